pub mod authorize;
pub mod client;
pub mod mime_builder;
pub mod oauth;
pub mod types;

pub use authorize::{AuthorizeError, Authorizer, InstalledAppFlow};
pub use client::{GmailClient, GmailClientError};
pub use mime_builder::{EmailAddress, MimeBuildError, MimeMessage};
pub use oauth::{Credential, DEFAULT_REFRESH_BUFFER, NoopTokenStore, OAuthError, TokenStore};
pub use types::*;
