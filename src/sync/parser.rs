//! MIME parsing of fetched messages.
//!
//! Turns one raw FETCH result into a [`Message`] using the `mailparse` crate.
//! Parsing is field-tolerant: a header or body part that cannot be decoded is
//! logged and left at its zero value, the rest of the message is still
//! returned. Only the run-level fetch can fail a synchronization, never the
//! parser.
//!
//! # Extracted fields
//!
//! - **id**: envelope Message-Id, else the `Message-ID` header, else `seq-{n}`;
//!   angle brackets stripped
//! - **date**: RFC 2822 `Date`, normalised to UTC (lenient fallback via `dateparser`)
//! - **subject**: decoded and trimmed
//! - **address lists**: `From`, `Sender`, `Cc`, `Bcc`, `Reply-To`, each rendered
//!   as `Name <addr>` strings, groups flattened
//! - **bodies**: first `text/plain` and first `text/html` inline parts, trimmed
//! - **attachments**: parts with `Content-Disposition: attachment`, and non-text
//!   parts that carry no disposition at all

use crate::mailbox::RawMessage;
use crate::sync::message::{Attachment, Message};
use chrono::{DateTime, Utc};
use mailparse::{
    DispositionType, MailAddr, MailHeaderMap, ParsedMail, SingleInfo, addrparse_header, parse_mail,
};
use thiserror::Error;

/// A single field that could not be decoded. Never fatal.
#[derive(Debug, Error)]
pub enum FieldParseError {
    #[error("failed to parse MIME structure: {0}")]
    Mime(#[from] mailparse::MailParseError),
    #[error("invalid Date header `{0}`")]
    Date(String),
    #[error("invalid {field} header: {reason}")]
    AddressList { field: &'static str, reason: String },
    #[error("unreadable {mimetype} part: {reason}")]
    Part { mimetype: String, reason: String },
}

const ADDRESS_FIELDS: [&str; 5] = ["From", "Sender", "Cc", "Bcc", "Reply-To"];

/// Remove NUL bytes and surrounding whitespace.
fn sanitize_text(text: &str) -> String {
    text.replace('\0', "").trim().to_string()
}

/// Clean and normalize message IDs by removing angle brackets and whitespace
fn normalize_message_id(msg_id: Option<&str>) -> Option<String> {
    msg_id.and_then(|id| {
        let cleaned = id.trim().trim_matches(&['<', '>'][..]).trim();
        if cleaned.is_empty() {
            None
        } else {
            Some(sanitize_text(cleaned))
        }
    })
}

fn format_single(info: &SingleInfo) -> String {
    match info.display_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => format!("{} <{}>", name, info.addr),
        _ => info.addr.clone(),
    }
}

fn parse_address_list(
    parsed: &ParsedMail<'_>,
    field: &'static str,
) -> Result<Vec<String>, FieldParseError> {
    let Some(header) = parsed.headers.get_first_header(field) else {
        return Ok(Vec::new());
    };

    let list = addrparse_header(header).map_err(|e| FieldParseError::AddressList {
        field,
        reason: e.to_string(),
    })?;

    let mut rendered = Vec::new();
    for addr in list.iter() {
        match addr {
            MailAddr::Single(info) => rendered.push(format_single(info)),
            MailAddr::Group(group) => rendered.extend(group.addrs.iter().map(format_single)),
        }
    }
    Ok(rendered)
}

fn parse_date(raw: &str) -> Result<DateTime<Utc>, FieldParseError> {
    if let Some(date) = mailparse::dateparse(raw)
        .ok()
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
    {
        return Ok(date);
    }

    dateparser::parse(raw).map_err(|_| FieldParseError::Date(raw.to_string()))
}

/// A leaf is an attachment unless it is explicitly inline, or it is text
/// without a disposition. mailparse reports a missing header as inline, so
/// presence is checked on the raw header.
fn is_attachment(part: &ParsedMail<'_>, disposition: &DispositionType, mimetype: &str) -> bool {
    match disposition {
        DispositionType::Attachment => true,
        DispositionType::Inline => {
            part.headers.get_first_value("Content-Disposition").is_none()
                && !mimetype.starts_with("text/")
        }
        _ => !mimetype.starts_with("text/"),
    }
}

/// Walk the MIME tree, filling bodies and attachments.
fn collect_parts(part: &ParsedMail<'_>, message: &mut Message) {
    if !part.subparts.is_empty() {
        for subpart in &part.subparts {
            collect_parts(subpart, message);
        }
        return;
    }

    let disposition = part.get_content_disposition();
    let mimetype = part.ctype.mimetype.to_ascii_lowercase();

    if is_attachment(part, &disposition.disposition, &mimetype) {
        let name = disposition
            .params
            .get("filename")
            .or_else(|| part.ctype.params.get("name"))
            .map(|name| sanitize_text(name))
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("attachment-{}", message.attachments.len() + 1));

        match part.get_body_raw() {
            Ok(payload) => message
                .attachments
                .push(Attachment::new(name, mimetype, payload)),
            Err(e) => log::warn!(
                "message {}: {}",
                message.id,
                FieldParseError::Part {
                    mimetype,
                    reason: e.to_string()
                }
            ),
        }
        return;
    }

    let slot = match mimetype.as_str() {
        "text/plain" => &mut message.body_text,
        "text/html" => &mut message.body_html,
        _ => return,
    };
    if !slot.is_empty() {
        return;
    }

    match part.get_body() {
        Ok(body) => *slot = sanitize_text(&body),
        Err(e) => log::warn!(
            "message {}: {}",
            message.id,
            FieldParseError::Part {
                mimetype,
                reason: e.to_string()
            }
        ),
    }
}

/// Parse one FETCH result. Never fails; undecodable fields stay empty.
pub fn parse_message(raw: &RawMessage) -> Message {
    let envelope_id = normalize_message_id(raw.envelope_id.as_deref());

    let parsed = match parse_mail(&raw.body) {
        Ok(parsed) => parsed,
        Err(e) => {
            let id = envelope_id.unwrap_or_else(|| format!("seq-{}", raw.seq));
            log::warn!("message {}: {}", id, FieldParseError::Mime(e));
            return Message::new(raw.seq, id);
        }
    };

    let id = envelope_id
        .or_else(|| normalize_message_id(parsed.headers.get_first_value("Message-ID").as_deref()))
        .unwrap_or_else(|| format!("seq-{}", raw.seq));
    let mut message = Message::new(raw.seq, id);

    match parsed.headers.get_first_value("Date") {
        Some(raw_date) => match parse_date(raw_date.trim()) {
            Ok(date) => message.date = date,
            Err(e) => log::warn!("message {}: {}", message.id, e),
        },
        None => log::warn!("message {}: missing Date header", message.id),
    }

    message.subject = parsed
        .headers
        .get_first_value("Subject")
        .map(|s| sanitize_text(&s))
        .unwrap_or_default();

    for field in ADDRESS_FIELDS {
        let addresses = match parse_address_list(&parsed, field) {
            Ok(addresses) => addresses,
            Err(e) => {
                log::warn!("message {}: {}", message.id, e);
                continue;
            }
        };
        match field {
            "From" => message.from = addresses,
            "Sender" => message.sender = addresses,
            "Cc" => message.cc = addresses,
            "Bcc" => message.bcc = addresses,
            _ => message.reply_to = addresses,
        }
    }

    collect_parts(&parsed, &mut message);

    log::trace!("parsed: {} - {}", message.id, message.subject);
    message
}
