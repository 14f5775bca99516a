use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use uuid::Uuid;

/// Fresh URL-safe lobby token (16 characters from 12 random bytes)
pub fn mint_token() -> String {
    let id = Uuid::new_v4();
    URL_SAFE_NO_PAD.encode(&id.as_bytes()[..12])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_tokens_are_url_safe_and_distinct() {
        let tokens: HashSet<String> = (0..256).map(|_| mint_token()).collect();
        assert_eq!(tokens.len(), 256);
        for token in &tokens {
            assert_eq!(token.len(), 16);
            assert!(token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        }
    }
}
