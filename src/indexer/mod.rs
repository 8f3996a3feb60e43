//! Document preparation: fingerprinting, sanitising, and chunking of
//! extracted text before it is matched against questions.
pub mod chunker;
pub mod hasher;
pub mod sanitiser;
