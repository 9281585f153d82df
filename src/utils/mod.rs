//! Utility functions

pub mod image;

pub use self::image::{decode_base64, ImageSource};
