mod html_token;
mod identical_bytes;
mod length;
mod links;
mod text;

pub use html_token::HtmlTokenDiff;
pub use identical_bytes::IdenticalBytesDiff;
pub use length::LengthDiff;
pub use links::LinksDiff;
pub use text::TextDiff;
