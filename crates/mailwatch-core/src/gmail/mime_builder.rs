use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use mail_builder::MessageBuilder;
use mail_builder::headers::address::Address;
use thiserror::Error;

/// Simple representation of an email address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailAddress {
    pub email: String,
    pub name: Option<String>,
}

impl EmailAddress {
    pub fn new(name: Option<impl Into<String>>, email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: name.map(|n| n.into()),
        }
    }
}

impl From<&str> for EmailAddress {
    fn from(email: &str) -> Self {
        Self {
            email: email.to_string(),
            name: None,
        }
    }
}

impl From<String> for EmailAddress {
    fn from(email: String) -> Self {
        Self { email, name: None }
    }
}

/// High-level MIME message builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeMessage {
    pub from: EmailAddress,
    pub to: Vec<EmailAddress>,
    pub subject: Option<String>,
    pub body_plain: Option<String>,
    pub body_html: Option<String>,
}

impl MimeMessage {
    /// Build the RFC 5322 message as a string. With both bodies set the
    /// result is `multipart/alternative`.
    pub fn to_rfc822(self) -> Result<String, MimeBuildError> {
        if self.to.is_empty() {
            return Err(MimeBuildError::MissingRecipients);
        }

        if self.body_plain.is_none() && self.body_html.is_none() {
            return Err(MimeBuildError::MissingBody);
        }

        let mut builder = MessageBuilder::new()
            .from(to_header_address(&self.from))
            .to(address_list(&self.to));

        if let Some(subject) = self.subject.as_ref() {
            builder = builder.subject(subject.as_str());
        }
        if let Some(body) = self.body_plain.as_ref() {
            builder = builder.text_body(body.as_str());
        }
        if let Some(body) = self.body_html.as_ref() {
            builder = builder.html_body(body.as_str());
        }

        builder.write_to_string().map_err(MimeBuildError::Io)
    }

    /// Build the message and return it base64url encoded for the Gmail API.
    pub fn to_base64_url(self) -> Result<String, MimeBuildError> {
        let raw = self.to_rfc822()?;
        Ok(URL_SAFE_NO_PAD.encode(raw.as_bytes()))
    }
}

#[derive(Debug, Error)]
pub enum MimeBuildError {
    #[error("at least one recipient is required")]
    MissingRecipients,
    #[error("a body is required")]
    MissingBody,
    #[error("failed to build message: {0}")]
    Io(#[from] std::io::Error),
}

fn to_header_address(addr: &EmailAddress) -> Address<'static> {
    Address::new_address(addr.name.clone(), addr.email.clone())
}

fn address_list(addrs: &[EmailAddress]) -> Address<'static> {
    let list: Vec<Address<'static>> = addrs.iter().map(to_header_address).collect();
    Address::new_list(list)
}
