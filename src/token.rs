//! Modification tokens (spec §3): opaque strings of the form
//! `<millis>-<random-base36>` matching `^\d+-[a-z0-9]+$`. Two tokens are
//! equal iff byte-equal; order carries no meaning.

use rand::Rng;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

pub fn generate(now_millis: u64) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..12).map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char).collect();
    format!("{now_millis}-{suffix}")
}

pub fn is_valid(token: &str) -> bool {
    let Some((millis, suffix)) = token.split_once('-') else { return false };
    if millis.is_empty() || !millis.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit() || b.is_ascii_lowercase()) {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_valid_and_distinct() {
        let a = generate(1_700_000_000_000);
        let b = generate(1_700_000_000_000);
        assert!(is_valid(&a));
        assert!(is_valid(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(!is_valid(""));
        assert!(!is_valid("abc-def"));
        assert!(!is_valid("123-"));
        assert!(!is_valid("123-ABC"));
        assert!(!is_valid("123"));
    }
}
