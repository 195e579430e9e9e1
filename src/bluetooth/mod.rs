pub mod decoder;
pub mod scanner;

pub use scanner::listen;
