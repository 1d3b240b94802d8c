use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CharacterClass {
    Letter,
    Digit,
    Symbol,
}

impl CharacterClass {
    pub fn of(c: char) -> Self {
        if c.is_alphabetic() {
            CharacterClass::Letter
        } else if c.is_ascii_digit() {
            CharacterClass::Digit
        } else {
            CharacterClass::Symbol
        }
    }
}

/// Characters that need shift on a US physical keyboard.
const US_SHIFTED_SYMBOLS: &str = "~!@#$%^&*()_+{}|:\"<>?";

/// Whether `c` needs shift held on a US layout. Used for the audit trail of
/// direct keyboard typing; virtual keypads decide this from their own layout.
pub fn us_requires_shift(c: char) -> bool {
    c.is_ascii_uppercase() || US_SHIFTED_SYMBOLS.contains(c)
}
