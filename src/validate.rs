/// Shortest accepted nickname, in characters.
pub const NICKNAME_MIN_LEN: usize = 3;
/// Longest accepted nickname, in characters.
pub const NICKNAME_MAX_LEN: usize = 20;
/// Number of digits in an emailed one-time code.
pub const OTP_CODE_LEN: usize = 6;

/// Validates a leaderboard nickname.
///
/// A valid nickname is:
/// - 3 to 20 characters long
/// - Made of ASCII letters, digits, `_` or `-`
#[must_use]
pub fn is_valid_nickname(s: &str) -> bool {
    (NICKNAME_MIN_LEN..=NICKNAME_MAX_LEN).contains(&s.len())
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Validates an email address well enough to send it a one-time code.
///
/// Exactly one `@`, a non-empty local part, a dotted domain with no empty
/// labels, and no whitespace. Deliverability is the identity backend's call.
#[must_use]
pub fn is_valid_email(s: &str) -> bool {
    if s.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && domain.split('.').all(|label| !label.is_empty())
}

/// Validates a one-time code: exactly six ASCII digits.
#[must_use]
pub fn is_valid_otp_code(s: &str) -> bool {
    s.len() == OTP_CODE_LEN && s.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_nickname() {
        assert!(is_valid_nickname("bob"));
        assert!(is_valid_nickname("Bottle_Catcher-99"));
        assert!(is_valid_nickname("abcdefghijklmnopqrst")); // 20 chars
    }

    #[test]
    fn test_invalid_nickname_length() {
        assert!(!is_valid_nickname("ab"));
        assert!(!is_valid_nickname("abcdefghijklmnopqrstu")); // 21 chars
        assert!(!is_valid_nickname(""));
    }

    #[test]
    fn test_invalid_nickname_characters() {
        assert!(!is_valid_nickname("bob smith"));
        assert!(!is_valid_nickname("bob!"));
        assert!(!is_valid_nickname("bób"));
    }

    #[test]
    fn test_valid_email() {
        assert!(is_valid_email("a@b.com"));
        assert!(is_valid_email("first.last+tag@mail.example.org"));
    }

    #[test]
    fn test_invalid_email() {
        assert!(!is_valid_email("a.b.com"));
        assert!(!is_valid_email("@b.com"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a@b..com"));
        assert!(!is_valid_email("a@@b.com"));
        assert!(!is_valid_email("a @b.com"));
    }

    #[test]
    fn test_otp_code() {
        assert!(is_valid_otp_code("123456"));
        assert!(is_valid_otp_code("000000"));
        assert!(!is_valid_otp_code("12345"));
        assert!(!is_valid_otp_code("1234567"));
        assert!(!is_valid_otp_code("12a456"));
    }
}
