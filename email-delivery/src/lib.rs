pub mod render;
pub mod smtp;

pub use render::{render_html, render_plain, subject_line};
pub use smtp::{sample_digest, EmailError, SmtpConfig, SmtpDelivery};
