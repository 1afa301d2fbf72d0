use rand::distributions::Alphanumeric;
use rand::Rng;

/// Random URL-safe token for a call room.
pub fn generate_room_token(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_has_requested_length_and_is_url_safe() {
        let token = generate_room_token(16);
        assert_eq!(token.len(), 16);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn tokens_differ() {
        assert_ne!(generate_room_token(24), generate_room_token(24));
    }
}
