use anyhow::Context;
use clap::{Parser, Subcommand};
use concierge_chats::{ChatStore, ChatType, MessageKind, NewConversation, NewMessage};
use concierge_config::load as load_config;
use concierge_gateway::create_router;
use concierge_runtime::{telemetry, BackendServices};
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser)]
#[command(name = "concierge-server")]
#[command(about = "Concierge chat backend (serves by default)")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP and WebSocket server
    Serve,
    /// Seed the database with a demo company and print session tokens
    SeedData,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server().await,
        Commands::SeedData => seed_data().await,
    }
}

async fn run_server() -> anyhow::Result<()> {
    telemetry::init_tracing().context("failed to initialise tracing")?;

    info!("starting Concierge backend");

    let config = load_config().context("failed to load configuration")?;

    let services = BackendServices::initialise(&config)
        .await
        .context("failed to initialise backend services")?;

    let app = create_router(services.gateway_state(&config));

    let address = format!("{}:{}", config.http.address, config.http.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind http listener on {address}"))?;

    info!(%address, "http server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(concierge_runtime::shutdown_signal())
        .await
        .context("http server error")?;

    info!(sessions = services.hub.session_count(), "backend shut down");
    Ok(())
}

const SEED_USERS: &[(&str, &str)] = &[
    ("frontdesk@example.com", "Front Desk"),
    ("housekeeping@example.com", "Housekeeping"),
    ("guest@example.com", "Guest in 204"),
];

async fn seed_data() -> anyhow::Result<()> {
    telemetry::init_tracing().context("failed to initialise tracing")?;

    let config = load_config().context("failed to load configuration")?;

    let services = BackendServices::initialise(&config)
        .await
        .context("failed to initialise backend services")?;

    let company_id = services
        .authenticator
        .create_company("Demo Hotel")
        .await
        .context("failed to create demo company")?;

    let mut users = Vec::with_capacity(SEED_USERS.len());
    for &(email, name) in SEED_USERS {
        let user = services
            .authenticator
            .create_user(company_id, Some(email), Some(name))
            .await
            .with_context(|| format!("failed to create user {email}"))?;
        let session = services
            .authenticator
            .issue_session(user.id)
            .await
            .with_context(|| format!("failed to issue a session for {email}"))?;
        users.push((user, session));
    }

    let Some(((owner, _), rest)) = users.split_first() else {
        anyhow::bail!("no seed users were created");
    };

    let conversation = services
        .store
        .create_conversation(NewConversation {
            company_id,
            creator_id: owner.id,
            chat_type: ChatType::Group,
            title: "Front desk".to_string(),
            description: Some("Requests from guests and staff".to_string()),
            members: rest.iter().map(|(user, _)| user.id).collect(),
        })
        .await
        .context("failed to create demo conversation")?;

    services
        .store
        .create_message(NewMessage {
            conversation_id: conversation.id,
            sender_id: owner.id,
            kind: MessageKind::Text,
            content: "Welcome! Ask us anything during your stay.".to_string(),
            reply_to_id: None,
            forwarded_from_id: None,
            media_id: None,
            sticker_id: None,
            is_silent: false,
            extras: None,
        })
        .await
        .context("failed to post welcome message")?;

    let brochure = services
        .store
        .register_media(
            owner.id,
            "welcome.pdf".to_string(),
            "application/pdf".to_string(),
            48_213,
        )
        .await
        .context("failed to register demo media")?;

    println!("company {company_id}: Demo Hotel");
    println!("conversation {}: {}", conversation.id, conversation.title);
    println!("media {} owned by user {}: {}", brochure.id, owner.id, brochure.file_name);
    println!();
    println!("{:<6} {:<28} {:<64}", "USER", "EMAIL", "TOKEN");
    println!("{}", "-".repeat(100));
    for (user, session) in &users {
        println!(
            "{:<6} {:<28} {:<64}",
            user.id,
            user.email.as_deref().unwrap_or("-"),
            session.token
        );
    }

    info!(company_id, conversation_id = conversation.id, "seed data created");
    Ok(())
}
