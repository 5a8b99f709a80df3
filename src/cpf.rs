/// Number of digits in a CPF, check digits included.
pub const CPF_LEN: usize = 11;

/// Keeps only the ASCII digits of `raw`.
#[must_use]
pub fn strip_non_digits(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Validates a CPF (Cadastro de Pessoas Físicas) number.
///
/// An empty value passes when the field is not required, so untouched
/// optional inputs are not flagged. Anything else has its separators
/// ignored and must be:
/// - Exactly 11 digits
/// - Not a single repeated digit (`000.000.000-00` and friends)
/// - Terminated by the two modulo-11 check digits of the preceding digits
#[must_use]
pub fn validate_cpf(raw: &str, is_required: bool) -> bool {
    if raw.is_empty() {
        return !is_required;
    }

    let digits: Vec<u32> = raw.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != CPF_LEN {
        return false;
    }
    if digits.iter().all(|&d| d == digits[0]) {
        return false;
    }

    check_digit(&digits[..9]) == digits[9] && check_digit(&digits[..10]) == digits[10]
}

/// Weighted modulo-11 check digit: weights run from `len + 1` down to 2.
fn check_digit(digits: &[u32]) -> u32 {
    let top = digits.len() as u32 + 1;
    let sum: u32 = digits
        .iter()
        .zip((2..=top).rev())
        .map(|(d, weight)| d * weight)
        .sum();
    match sum % 11 {
        r if r < 2 => 0,
        r => 11 - r,
    }
}

/// Formats a (possibly partial) CPF as `NNN.NNN.NNN-NN`.
///
/// Meant for live typing: separators appear as digits accumulate and
/// anything past the eleventh digit is dropped.
#[must_use]
pub fn format_cpf(raw: &str) -> String {
    let mut out = String::with_capacity(CPF_LEN + 3);
    for (i, c) in raw.chars().filter(char::is_ascii_digit).take(CPF_LEN).enumerate() {
        match i {
            3 | 6 => out.push('.'),
            9 => out.push('-'),
            _ => {}
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    /// Appends both check digits to a nine-digit base.
    fn complete(base: &[u32; 9]) -> String {
        let mut digits = base.to_vec();
        digits.push(check_digit(&digits));
        digits.push(check_digit(&digits));
        digits.iter().map(|d| char::from_digit(*d, 10).unwrap()).collect()
    }

    #[test]
    fn test_valid_cpf() {
        assert!(validate_cpf("52998224725", true));
        assert!(validate_cpf("529.982.247-25", true));
        assert!(validate_cpf("111.444.777-35", false));
    }

    #[test]
    fn test_empty_cpf_depends_on_required() {
        assert!(validate_cpf("", false));
        assert!(!validate_cpf("", true));
    }

    #[test]
    fn test_non_empty_input_without_digits_is_invalid() {
        assert!(!validate_cpf("..-", false));
        assert!(!validate_cpf("abc", false));
        assert!(!validate_cpf(" ", false));
    }

    #[test]
    fn test_invalid_cpf_wrong_length() {
        assert!(!validate_cpf("5299822472", true)); // 10 digits
        assert!(!validate_cpf("529982247250", true)); // 12 digits
        assert!(!validate_cpf("529", false));
    }

    #[test]
    fn test_invalid_cpf_check_digits() {
        assert!(!validate_cpf("52998224724", true));
        assert!(!validate_cpf("52998224735", true));
    }

    #[test]
    fn test_repeated_digits_rejected() {
        for d in 0..=9 {
            let cpf = d.to_string().repeat(CPF_LEN);
            assert!(!validate_cpf(&cpf, true), "{cpf} should be rejected");
        }
    }

    #[test]
    fn test_format_progressive() {
        assert_eq!(format_cpf(""), "");
        assert_eq!(format_cpf("529"), "529");
        assert_eq!(format_cpf("5299"), "529.9");
        assert_eq!(format_cpf("5299822"), "529.982.2");
        assert_eq!(format_cpf("5299822472"), "529.982.247-2");
        assert_eq!(format_cpf("52998224725"), "529.982.247-25");
    }

    #[test]
    fn test_format_caps_at_eleven_digits() {
        assert_eq!(format_cpf("5299822472599"), "529.982.247-25");
        assert_eq!(format_cpf("abc529-982x247.25"), "529.982.247-25");
    }

    #[test]
    fn test_strip_non_digits() {
        assert_eq!(strip_non_digits("529.982.247-25"), "52998224725");
        assert_eq!(strip_non_digits(" a-b "), "");
    }

    proptest! {
        #[test]
        fn generated_cpfs_validate(base in prop::array::uniform9(0u32..10)) {
            prop_assume!(base.iter().any(|&d| d != base[0]));
            let cpf = complete(&base);
            prop_assert!(validate_cpf(&cpf, true));
            prop_assert!(validate_cpf(&format_cpf(&cpf), true));
        }

        #[test]
        fn flipped_check_digit_fails(base in prop::array::uniform9(0u32..10), bump in 1u32..10, pos in 9usize..11) {
            prop_assume!(base.iter().any(|&d| d != base[0]));
            let mut digits: Vec<u32> = complete(&base).chars().filter_map(|c| c.to_digit(10)).collect();
            digits[pos] = (digits[pos] + bump) % 10;
            let cpf: String = digits.iter().map(|d| char::from_digit(*d, 10).unwrap()).collect();
            prop_assert!(!validate_cpf(&cpf, true));
        }

        #[test]
        fn format_is_idempotent(raw in "[0-9.\\- ]{0,16}") {
            let once = format_cpf(&raw);
            prop_assert_eq!(format_cpf(&once), once);
        }
    }
}
