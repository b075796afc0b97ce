//! Phone canonicalization. The canonical form is the deduplication key for leads.

use serde::{Deserialize, Serialize};

/// National numbering plan the canonicalizer targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhoneFormat {
    pub country_code: String,
    pub trunk_prefix: char,
    pub subscriber_digits: usize,
}

impl Default for PhoneFormat {
    fn default() -> Self {
        Self {
            country_code: "94".to_string(),
            trunk_prefix: '0',
            subscriber_digits: 9,
        }
    }
}

impl PhoneFormat {
    fn canonical_len(&self) -> usize {
        self.country_code.len() + self.subscriber_digits
    }

    /// Reduce an arbitrary phone string to country code + subscriber digits.
    ///
    /// Total and deterministic. Inputs too short to be a subscriber number come
    /// back as their raw digits, so the result is best-effort for those.
    pub fn canonicalize(&self, raw: &str) -> String {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        let sub = self.subscriber_digits;
        let cc = self.country_code.as_str();

        if digits.starts_with(cc) && digits.len() == self.canonical_len() {
            return digits;
        }
        if digits.len() == sub + 1 && digits.starts_with(self.trunk_prefix) {
            return format!("{cc}{}", &digits[1..]);
        }
        if digits.len() == sub {
            return format!("{cc}{digits}");
        }
        if digits.len() > sub {
            return format!("{cc}{}", &digits[digits.len() - sub..]);
        }
        digits
    }

    /// Human-facing rendering of a phone, e.g. `+94 77 123 4567`.
    pub fn display(&self, raw: &str) -> String {
        let canonical = self.canonicalize(raw);
        if canonical.len() != self.canonical_len() || !canonical.starts_with(&self.country_code) {
            return raw.trim().to_string();
        }
        let subscriber = &canonical[self.country_code.len()..];
        if subscriber.len() == 9 {
            format!(
                "+{} {} {} {}",
                self.country_code,
                &subscriber[..2],
                &subscriber[2..5],
                &subscriber[5..]
            )
        } else {
            format!("+{canonical}")
        }
    }
}

pub fn canonicalize_phone(raw: &str) -> String {
    PhoneFormat::default().canonicalize(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: &[&str] = &[
        "",
        "n/a",
        "0771234567",
        "+94 77 123 4567",
        "94771234567",
        "771234567",
        "(077) 123-4567",
        "0094771234567",
        "+1 415 555 0100 ext 99",
        "12345",
        "9477123456",
        "7712345678",
        "٠٧٧١٢٣٤٥٦٧",
    ];

    #[test]
    fn national_and_international_forms_agree() {
        let expected = "94771234567";
        for raw in ["0771234567", "+94 77 123 4567", "94771234567", "771234567", "(077) 123-4567", "0094771234567"] {
            assert_eq!(canonicalize_phone(raw), expected, "input {raw:?}");
        }
    }

    #[test]
    fn short_inputs_fall_back_to_raw_digits() {
        assert_eq!(canonicalize_phone("12-34-5"), "12345");
        assert_eq!(canonicalize_phone("no phone"), "");
        assert_eq!(canonicalize_phone("٠٧٧١٢٣٤٥٦٧"), "");
    }

    #[test]
    fn overlong_inputs_keep_last_subscriber_digits() {
        assert_eq!(canonicalize_phone("+1 415 555 0100 ext 99"), "94555010099");
        assert_eq!(canonicalize_phone("7712345678"), "94712345678");
    }

    #[test]
    fn canonicalization_is_idempotent() {
        for raw in SAMPLES {
            let once = canonicalize_phone(raw);
            assert_eq!(canonicalize_phone(&once), once, "input {raw:?}");
        }
    }

    #[test]
    fn display_form_groups_subscriber_digits() {
        let fmt = PhoneFormat::default();
        assert_eq!(fmt.display("0771234567"), "+94 77 123 4567");
        assert_eq!(fmt.display(" 123 "), "123");
    }

    #[test]
    fn custom_plan_is_respected() {
        let fmt = PhoneFormat {
            country_code: "44".into(),
            trunk_prefix: '0',
            subscriber_digits: 10,
        };
        assert_eq!(fmt.canonicalize("07700 900123"), "447700900123");
        assert_eq!(fmt.display("07700 900123"), "+447700900123");
    }
}
