// Laminark atoms — pure data shared by every engine layer.
// No I/O here: error enum, domain types, constants.

pub mod constants;
pub mod error;
pub mod types;
