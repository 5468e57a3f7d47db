//! Workbook codec: [`Ledger`] to and from `.xlsx` bytes via `umya-spreadsheet`.

use crate::sync::error::{SyncError, SyncResult};
use crate::sync::ledger::{
    ATTACHMENT_COLUMNS, ATTACHMENT_SHEET, Cell, Ledger, MESSAGE_SHEET, Sheet,
};
use std::io::Cursor;
use umya_spreadsheet::helper::coordinate::string_from_column_index;
use umya_spreadsheet::{HorizontalAlignmentValues, Spreadsheet, Worksheet};

const HEADER_COLOR: &str = "FF000080";
const LINK_COLOR: &str = "FF1265BE";
const HEADER_HEIGHT: f64 = 15.0;
const DATA_HEIGHT: f64 = 25.0;

/// Column widths by header name; unknown headers get the default.
fn column_width(header: &str) -> f64 {
    match header {
        "Id" | "Subject" => 100.0,
        "Date" => 30.0,
        "Type" => 30.0,
        _ => 50.0,
    }
}

fn coordinate(row: usize, col: usize) -> (u32, u32) {
    ((col + 1) as u32, (row + 1) as u32)
}

fn write_sheet(worksheet: &mut Worksheet, sheet: &Sheet) {
    for (row_index, row) in sheet.rows.iter().enumerate() {
        let height = if row_index == 0 { HEADER_HEIGHT } else { DATA_HEIGHT };
        worksheet
            .get_row_dimension_mut(&((row_index + 1) as u32))
            .set_height(height);

        for (col_index, cell) in row.iter().enumerate() {
            let coord = coordinate(row_index, col_index);
            let target = worksheet.get_cell_mut(coord);
            target.set_value_string(cell.value.as_str());
            if let Some(url) = &cell.link {
                target.get_hyperlink_mut().set_url(url.as_str());
            }

            let style = worksheet.get_style_mut(coord);
            let alignment = style.get_alignment_mut();
            alignment.set_horizontal(HorizontalAlignmentValues::Center);
            // Links stay on one line; plain data cells wrap.
            if row_index > 0 && cell.link.is_none() {
                alignment.set_wrap_text(true);
            }

            if row_index == 0 {
                let font = style.get_font_mut();
                font.set_bold(true);
                font.get_color_mut().set_argb(HEADER_COLOR);
            } else if cell.link.is_some() {
                let font = style.get_font_mut();
                font.set_underline("single");
                font.get_color_mut().set_argb(LINK_COLOR);
            }
        }
    }

    if let Some(header) = sheet.rows.first() {
        for (col_index, cell) in header.iter().enumerate() {
            let column = string_from_column_index(&((col_index + 1) as u32));
            worksheet
                .get_column_dimension_mut(&column)
                .set_width(column_width(&cell.value));
        }
    }
}

fn read_sheet(worksheet: &Worksheet, name: &str) -> Sheet {
    let (max_col, max_row) = worksheet.get_highest_column_and_row();
    let mut rows = Vec::with_capacity(max_row as usize);

    for row in 1..=max_row {
        let mut cells: Vec<Cell> = (1..=max_col)
            .map(|col| match worksheet.get_cell((col, row)) {
                Some(cell) => Cell {
                    value: cell.get_value().to_string(),
                    link: cell
                        .get_hyperlink()
                        .map(|link| link.get_url().to_string())
                        .filter(|url| !url.is_empty()),
                },
                None => Cell::default(),
            })
            .collect();

        while cells.last().is_some_and(|cell| *cell == Cell::default()) {
            cells.pop();
        }
        rows.push(cells);
    }

    Sheet {
        name: name.to_string(),
        rows,
    }
}

/// Serialise the whole ledger into a new workbook.
pub fn encode(ledger: &Ledger) -> SyncResult<Vec<u8>> {
    let mut book: Spreadsheet = umya_spreadsheet::new_file();

    let messages = book
        .get_sheet_by_name_mut(MESSAGE_SHEET)
        .ok_or_else(|| SyncError::Encode(format!("new workbook lacks {MESSAGE_SHEET}")))?;
    write_sheet(messages, &ledger.messages);

    let attachments = book
        .new_sheet(ATTACHMENT_SHEET)
        .map_err(|e| SyncError::Encode(e.to_string()))?;
    write_sheet(attachments, &ledger.attachments);

    let mut buffer = Cursor::new(Vec::new());
    umya_spreadsheet::writer::xlsx::write_writer(&book, &mut buffer)
        .map_err(|e| SyncError::Encode(e.to_string()))?;
    Ok(buffer.into_inner())
}

/// Read a workbook produced by [`encode`].
///
/// Workbooks without an attachment sheet are accepted; an empty one is
/// created so the next write adds it.
pub fn decode(bytes: &[u8]) -> SyncResult<Ledger> {
    let book = umya_spreadsheet::reader::xlsx::read_reader(Cursor::new(bytes), true)
        .map_err(|e| SyncError::Decode(e.to_string()))?;

    let messages = book
        .get_sheet_by_name(MESSAGE_SHEET)
        .map(|worksheet| read_sheet(worksheet, MESSAGE_SHEET))
        .ok_or_else(|| SyncError::Decode(format!("workbook has no {MESSAGE_SHEET} sheet")))?;

    let attachments = match book.get_sheet_by_name(ATTACHMENT_SHEET) {
        Some(worksheet) => read_sheet(worksheet, ATTACHMENT_SHEET),
        None => {
            log::debug!("workbook has no {} sheet, starting one", ATTACHMENT_SHEET);
            Sheet::with_header(ATTACHMENT_SHEET, &ATTACHMENT_COLUMNS)
        }
    };

    Ok(Ledger {
        messages,
        attachments,
    })
}
