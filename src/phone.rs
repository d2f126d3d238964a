//! Phone number normalization.
//!
//! Pure string→string, shared by the `phone` column transform and the
//! trainer entity extraction (which captures best-effort phone numbers
//! from whatever column looks like a phone column).

/// Normalize a free-text phone number to digits (with an optional leading +).
///
/// - strips spaces, dashes, dots, parentheses
/// - `00` international prefix becomes `+`
/// - anything that ends up with no digits is returned trimmed as-is,
///   so garbage input stays visible instead of silently vanishing
pub fn normalize_phone(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut digits: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();

    if digits.starts_with("00") {
        digits.replace_range(..2, "+");
    }

    // Keep at most one leading +
    let plus = digits.starts_with('+');
    let body: String = digits.chars().filter(|c| c.is_ascii_digit()).collect();

    if body.is_empty() {
        return trimmed.to_string();
    }

    if plus {
        format!("+{}", body)
    } else {
        body
    }
}
