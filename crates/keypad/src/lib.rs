//! Virtual-keypad input: locate on-screen keys with a vision model, merge
//! the unshifted and shifted layouts into one character map, and click the
//! secret in with the right shift state.

pub mod charclass;
pub mod direct;
pub mod error;
pub mod layout;
pub mod mapper;
pub mod mask;
pub mod typing;

pub use charclass::CharacterClass;
pub use direct::DirectTyper;
pub use error::KeypadError;
pub use layout::{KeyboardKey, KeyboardLayout, KeyboardLayoutAnalyzer};
pub use mapper::{BilingualKeyMapper, CharacterMapEntry, KeypadMapping};
pub use typing::{CharacterDetail, FailedChar, FailureReason, TypingEngine, TypingResult};

#[cfg(test)]
pub(crate) mod test_support;
