//! Request payloads for worksheet creation, header cells and rows.

use std::io::Cursor;

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::errors::{SheetError, SheetResult};
use crate::feed::{ATOM_NS, GD_NS, GS_NS, GSX_NS};
use crate::xml::is_valid_name;

type XmlWriter = Writer<Cursor<Vec<u8>>>;

/// Worksheet sized for a header row only.
pub fn worksheet_xml(title: &str, column_count: usize) -> SheetResult<String> {
    let mut writer = start_document()?;
    let entry = BytesStart::new("entry").with_attributes([("xmlns", ATOM_NS), ("xmlns:gs", GS_NS)]);
    writer.write_event(Event::Start(entry))?;
    write_text_element(&mut writer, "title", title)?;
    write_text_element(&mut writer, "gs:colCount", &column_count.to_string())?;
    write_text_element(&mut writer, "gs:rowCount", "1")?;
    writer.write_event(Event::End(BytesEnd::new("entry")))?;
    finish(writer)
}

/// Single-cell update; `row` and `col` are 1-based.
pub fn cell_xml(cell_url: &str, value: &str, row: usize, col: usize) -> SheetResult<String> {
    let mut writer = start_document()?;
    let entry = BytesStart::new("entry").with_attributes([
        ("xmlns", ATOM_NS),
        ("xmlns:gs", GS_NS),
        ("xmlns:gd", GD_NS),
    ]);
    writer.write_event(Event::Start(entry))?;
    write_text_element(&mut writer, "id", cell_url)?;

    let row = row.to_string();
    let col = col.to_string();
    let cell = BytesStart::new("gs:cell").with_attributes([
        ("row", row.as_str()),
        ("col", col.as_str()),
        ("inputValue", value),
    ]);
    writer.write_event(Event::Empty(cell))?;
    writer.write_event(Event::End(BytesEnd::new("entry")))?;
    finish(writer)
}

/// List-feed row entry with one `gsx:` element per field, in the given order.
pub fn row_xml<'a, I>(fields: I) -> SheetResult<String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut writer = start_document()?;
    let entry =
        BytesStart::new("entry").with_attributes([("xmlns", ATOM_NS), ("xmlns:gsx", GSX_NS)]);
    writer.write_event(Event::Start(entry))?;
    for (field, value) in fields {
        if !is_valid_name(field) {
            return Err(SheetError::Serialization(format!(
                "'{field}' is not a valid row field name"
            )));
        }
        write_text_element(&mut writer, &format!("gsx:{field}"), value)?;
    }
    writer.write_event(Event::End(BytesEnd::new("entry")))?;
    finish(writer)
}

fn start_document() -> Result<XmlWriter, quick_xml::Error> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    Ok(writer)
}

fn write_text_element(
    writer: &mut XmlWriter,
    name: &str,
    text: &str,
) -> Result<(), quick_xml::Error> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn finish(writer: XmlWriter) -> SheetResult<String> {
    let bytes = writer.into_inner().into_inner();
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
