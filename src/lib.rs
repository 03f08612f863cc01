pub mod fastpass;

mod err;
pub use err::Error;
