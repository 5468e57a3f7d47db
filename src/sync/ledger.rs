//! In-memory ledger: the tabular record that is read, modified and rewritten
//! whole on every synchronization.
//!
//! Two sheets, each with a header row and newest data first:
//!
//! - `Sheet1`: one row per message with the fixed columns
//!   `Id, Date, From, Subject, Cc, Bcc, ReplyTo, Attachments`. The
//!   `Attachments` cell lists the attachment names.
//! - `Attachments`: one row per attachment, `MessageId, Name, Type`, where
//!   `Name` links to the uploaded blob (plain text if the upload failed).
//!
//! Keeping attachments on their own sheet gives every message row a fixed
//! width no matter how many files the message carried.

use crate::sync::error::{SyncError, SyncResult};
use crate::sync::message::{Message, join_addresses};
use crate::sync::watermark::{Watermark, format_ledger_date};

pub const MESSAGE_SHEET: &str = "Sheet1";
pub const ATTACHMENT_SHEET: &str = "Attachments";

pub const MESSAGE_COLUMNS: [&str; 8] = [
    "Id",
    "Date",
    "From",
    "Subject",
    "Cc",
    "Bcc",
    "ReplyTo",
    "Attachments",
];
pub const ATTACHMENT_COLUMNS: [&str; 3] = ["MessageId", "Name", "Type"];

/// Zero-based position of the Date column.
const DATE_COLUMN: usize = 1;

/// A cell value with an optional hyperlink target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cell {
    pub value: String,
    pub link: Option<String>,
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            link: None,
        }
    }

    pub fn linked(value: impl Into<String>, link: Option<String>) -> Self {
        Self {
            value: value.into(),
            link,
        }
    }
}

/// A named grid of rows; row 0 is the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<Cell>>,
}

impl Sheet {
    pub fn with_header(name: &str, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            rows: vec![columns.iter().map(|c| Cell::text(*c)).collect()],
        }
    }

    /// Insert `count` empty rows before `index`, shifting existing rows down.
    pub fn insert_rows(&mut self, index: usize, count: usize) {
        let index = index.min(self.rows.len());
        self.rows
            .splice(index..index, std::iter::repeat_n(Vec::new(), count));
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        self.rows.get(row).and_then(|cells| cells.get(col))
    }

    /// Set a cell, padding the row with empty cells as needed.
    pub fn set_cell(&mut self, row: usize, col: usize, cell: Cell) {
        if self.rows.len() <= row {
            self.rows.resize_with(row + 1, Vec::new);
        }
        let cells = &mut self.rows[row];
        if cells.len() <= col {
            cells.resize_with(col + 1, Cell::default);
        }
        cells[col] = cell;
    }

    /// Number of rows below the header.
    pub fn data_rows(&self) -> usize {
        self.rows.len().saturating_sub(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    pub messages: Sheet,
    pub attachments: Sheet,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    /// An empty ledger holding only the header rows.
    pub fn new() -> Self {
        Self {
            messages: Sheet::with_header(MESSAGE_SHEET, &MESSAGE_COLUMNS),
            attachments: Sheet::with_header(ATTACHMENT_SHEET, &ATTACHMENT_COLUMNS),
        }
    }

    /// A fresh ledger seeded with `messages` (expected newest first).
    pub fn from_messages(messages: &[Message]) -> Self {
        let mut ledger = Self::new();
        ledger.prepend(messages);
        ledger
    }

    /// Date of the newest recorded message.
    ///
    /// With no data row the ledger has no watermark. An unreadable Date cell
    /// falls back to [`Watermark::FLOOR`] (every message counts as new) unless
    /// `strict` is set, in which case it is an error.
    pub fn watermark(&self, strict: bool) -> SyncResult<Watermark> {
        if self.messages.data_rows() == 0 {
            return Ok(Watermark::None);
        }

        let raw = self
            .messages
            .cell(1, DATE_COLUMN)
            .map(|cell| cell.value.as_str())
            .unwrap_or_default();

        match Watermark::parse(raw) {
            Ok(watermark) => Ok(watermark),
            Err(e) if strict => {
                log::error!("ledger watermark `{}` unreadable: {}", raw, e);
                Err(SyncError::Watermark(raw.to_string()))
            }
            Err(e) => {
                log::warn!(
                    "ledger watermark `{}` unreadable ({}); treating every message as new",
                    raw,
                    e
                );
                Ok(Watermark::FLOOR)
            }
        }
    }

    /// Insert `messages` (newest first) directly under both headers.
    pub fn prepend(&mut self, messages: &[Message]) {
        self.messages.insert_rows(1, messages.len());
        for (offset, message) in messages.iter().enumerate() {
            for (col, cell) in message_row(message).into_iter().enumerate() {
                self.messages.set_cell(1 + offset, col, cell);
            }
        }

        let attachment_rows: Vec<Vec<Cell>> = messages.iter().flat_map(attachment_rows).collect();
        self.attachments.insert_rows(1, attachment_rows.len());
        for (offset, row) in attachment_rows.into_iter().enumerate() {
            for (col, cell) in row.into_iter().enumerate() {
                self.attachments.set_cell(1 + offset, col, cell);
            }
        }
    }
}

fn message_row(message: &Message) -> Vec<Cell> {
    let attachment_names: Vec<String> =
        message.attachments.iter().map(|a| a.name.clone()).collect();

    vec![
        Cell::text(message.id.as_str()),
        Cell::text(format_ledger_date(message.date)),
        Cell::text(join_addresses(&message.from)),
        Cell::text(message.subject.as_str()),
        Cell::text(join_addresses(&message.cc)),
        Cell::text(join_addresses(&message.bcc)),
        Cell::text(join_addresses(&message.reply_to)),
        Cell::text(join_addresses(&attachment_names)),
    ]
}

fn attachment_rows(message: &Message) -> Vec<Vec<Cell>> {
    message
        .attachments
        .iter()
        .map(|attachment| {
            vec![
                Cell::text(message.id.as_str()),
                Cell::linked(attachment.name.as_str(), attachment.link.clone()),
                Cell::text(attachment.content_type.as_str()),
            ]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::message::Attachment;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, hour, 30, 0).unwrap()
    }

    fn message(seq: u32, hour: u32) -> Message {
        let mut message = Message::new(seq, format!("id-{seq}"));
        message.date = at(hour);
        message.subject = format!("subject {seq}");
        message.from = vec!["Ann <ann@example.com>".into()];
        message.cc = vec!["bob@example.com".into(), "carol@example.com".into()];
        message
    }

    #[test]
    fn new_ledger_has_headers_only() {
        let ledger = Ledger::new();
        assert_eq!(ledger.messages.rows.len(), 1);
        assert_eq!(ledger.messages.rows[0][7], Cell::text("Attachments"));
        assert_eq!(ledger.attachments.rows[0][0], Cell::text("MessageId"));
        assert_eq!(ledger.watermark(true).unwrap(), Watermark::None);
    }

    #[test]
    fn rows_render_fixed_columns() {
        let ledger = Ledger::from_messages(&[message(2, 10)]);
        let row = &ledger.messages.rows[1];

        assert_eq!(row.len(), MESSAGE_COLUMNS.len());
        assert_eq!(row[0].value, "id-2");
        assert_eq!(row[1].value, "2024-06-01 10:30:00 +0000");
        assert_eq!(row[2].value, "Ann <ann@example.com>");
        assert_eq!(row[3].value, "subject 2");
        assert_eq!(row[4].value, "bob@example.com, carol@example.com");
        assert_eq!(row[5].value, "");
        assert_eq!(row[7].value, "");
    }

    #[test]
    fn watermark_reads_first_data_row() {
        let ledger = Ledger::from_messages(&[message(3, 12), message(2, 9)]);
        assert_eq!(ledger.watermark(false).unwrap(), Watermark::At(at(12)));
    }

    #[test]
    fn unreadable_watermark_falls_back_or_fails_in_strict_mode() {
        let mut ledger = Ledger::from_messages(&[message(1, 8)]);
        ledger.messages.set_cell(1, 1, Cell::text("yesterday"));

        assert_eq!(ledger.watermark(false).unwrap(), Watermark::FLOOR);
        assert!(matches!(
            ledger.watermark(true),
            Err(SyncError::Watermark(raw)) if raw == "yesterday"
        ));
    }

    #[test]
    fn prepend_inserts_under_header_and_keeps_old_rows() {
        let mut ledger = Ledger::from_messages(&[message(2, 9), message(1, 8)]);
        ledger.prepend(&[message(5, 14), message(4, 12), message(3, 11)]);

        let ids: Vec<&str> = ledger.messages.rows[1..]
            .iter()
            .map(|row| row[0].value.as_str())
            .collect();
        assert_eq!(ids, vec!["id-5", "id-4", "id-3", "id-2", "id-1"]);
        assert_eq!(ledger.messages.rows[0][0], Cell::text("Id"));
        assert_eq!(ledger.watermark(true).unwrap(), Watermark::At(at(14)));
    }

    #[test]
    fn attachments_go_to_their_own_sheet() {
        let mut with_files = message(2, 9);
        with_files.attachments = vec![
            Attachment {
                link: Some("https://blob/a".into()),
                ..Attachment::new("a.pdf", "application/pdf", Vec::new())
            },
            Attachment::new("b.png", "image/png", Vec::new()),
        ];
        let ledger = Ledger::from_messages(&[with_files, message(1, 8)]);

        assert_eq!(ledger.messages.rows[1].len(), MESSAGE_COLUMNS.len());
        assert_eq!(ledger.messages.rows[1][7].value, "a.pdf, b.png");
        assert_eq!(ledger.attachments.data_rows(), 2);
        assert_eq!(
            ledger.attachments.rows[1],
            vec![
                Cell::text("id-2"),
                Cell::linked("a.pdf", Some("https://blob/a".into())),
                Cell::text("application/pdf"),
            ]
        );
        assert_eq!(ledger.attachments.rows[2][1], Cell::text("b.png"));
    }

    #[test]
    fn insert_rows_shifts_existing_rows() {
        let mut sheet = Sheet::with_header("S", &["A"]);
        sheet.set_cell(1, 0, Cell::text("old"));
        sheet.insert_rows(1, 2);
        assert_eq!(sheet.rows.len(), 4);
        assert!(sheet.rows[1].is_empty() && sheet.rows[2].is_empty());
        assert_eq!(sheet.cell(3, 0), Some(&Cell::text("old")));
    }
}
