//! Markup-tree (XML) sources

use crate::error::{EtlError, Result};
use crate::record::{RecordBatch, Row, Value};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::path::Path;

/// Row being assembled from a record element
struct OpenRecord {
    /// Depth of the record element in the element stack
    depth: usize,
    row: Row,
    order: Vec<String>,
    /// One flag per open field element: has it seen text or children yet
    filled: Vec<bool>,
}

impl OpenRecord {
    fn set(&mut self, column: String, value: Value) {
        if !self.order.contains(&column) {
            self.order.push(column.clone());
        }
        match (self.row.get_mut(&column), value) {
            (Some(Value::Text(existing)), Value::Text(more)) => existing.push_str(&more),
            (_, value) => self.row.insert(column, value),
        }
    }
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

/// Read a markup document where each record is an element
///
/// Without `record_tag`, every child of the root element is a record. With
/// it, every element of that name outside another record is a record. Child
/// elements become columns (nested ones joined with dots), attributes on the
/// record element become columns, and empty elements are null.
pub fn read_markup(path: &Path, bytes: &[u8], record_tag: Option<&str>) -> Result<RecordBatch> {
    let text = std::str::from_utf8(bytes).map_err(|e| EtlError::source_read(path, e))?;
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut batch = RecordBatch::new();
    let mut stack: Vec<String> = Vec::new();
    let mut open: Option<OpenRecord> = None;

    let is_record = |stack: &[String]| match record_tag {
        Some(tag) => stack.last().is_some_and(|name| name == tag),
        None => stack.len() == 2,
    };
    let column_for = |stack: &[String], depth: usize| stack[depth..].join(".");

    loop {
        let event = reader
            .read_event()
            .map_err(|e| EtlError::source_read(path, e))?;

        match event {
            Event::Start(e) => {
                stack.push(element_name(&e));
                match open.as_mut() {
                    Some(record) => {
                        if let Some(parent) = record.filled.last_mut() {
                            *parent = true;
                        }
                        record.filled.push(false);
                    }
                    None if is_record(&stack) => {
                        let mut record = OpenRecord {
                            depth: stack.len(),
                            row: Row::new(),
                            order: Vec::new(),
                            filled: Vec::new(),
                        };
                        read_attributes(path, &e, &mut record)?;
                        open = Some(record);
                    }
                    None => {}
                }
            }
            Event::Empty(e) => {
                stack.push(element_name(&e));
                match open.as_mut() {
                    Some(record) => {
                        if let Some(parent) = record.filled.last_mut() {
                            *parent = true;
                        }
                        let column = column_for(&stack, record.depth);
                        record.set(column, Value::Null);
                    }
                    None if is_record(&stack) => {
                        let mut record = OpenRecord {
                            depth: stack.len(),
                            row: Row::new(),
                            order: Vec::new(),
                            filled: Vec::new(),
                        };
                        read_attributes(path, &e, &mut record)?;
                        finish(&mut batch, record);
                    }
                    None => {}
                }
                stack.pop();
            }
            Event::Text(t) => {
                if let Some(record) = open.as_mut()
                    && stack.len() > record.depth
                {
                    let value = t.unescape().map_err(|e| EtlError::source_read(path, e))?;
                    if let Some(field) = record.filled.last_mut() {
                        *field = true;
                    }
                    let column = column_for(&stack, record.depth);
                    record.set(column, Value::text(value.into_owned()));
                }
            }
            Event::CData(c) => {
                if let Some(record) = open.as_mut()
                    && stack.len() > record.depth
                {
                    let value = String::from_utf8_lossy(&c.into_inner()).into_owned();
                    if let Some(field) = record.filled.last_mut() {
                        *field = true;
                    }
                    let column = column_for(&stack, record.depth);
                    record.set(column, Value::text(value));
                }
            }
            Event::End(_) => {
                if let Some(mut record) = open.take() {
                    if stack.len() == record.depth {
                        finish(&mut batch, record);
                    } else {
                        if record.filled.pop() == Some(false) {
                            let column = column_for(&stack, record.depth);
                            record.set(column, Value::Null);
                        }
                        open = Some(record);
                    }
                }
                stack.pop();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if open.is_some() {
        return Err(EtlError::source_read(path, "document ended inside a record"));
    }

    Ok(batch)
}

fn read_attributes(path: &Path, e: &BytesStart<'_>, record: &mut OpenRecord) -> Result<()> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| EtlError::source_read(path, err))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| EtlError::source_read(path, err))?;
        record.set(key, Value::text(value.into_owned()));
    }
    Ok(())
}

fn finish(batch: &mut RecordBatch, record: OpenRecord) {
    for column in &record.order {
        batch.add_column(column.clone());
    }
    batch.push(record.row);
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEOPLE: &str = r#"<?xml version="1.0"?>
<people>
  <person id="p1">
    <name>Ada &amp; Co</name>
    <height>70</height>
    <weight/>
  </person>
  <person id="p2">
    <name><![CDATA[Bob <b>]]></name>
    <height></height>
    <address><city>Oslo</city></address>
  </person>
</people>"#;

    #[test]
    fn test_children_of_root_are_records() {
        let batch = read_markup(Path::new("p.xml"), PEOPLE.as_bytes(), None).unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(
            batch.columns(),
            &["id", "name", "height", "weight", "address.city"]
        );

        let first = &batch.rows()[0];
        assert_eq!(first.get("id"), Some(&Value::text("p1")));
        assert_eq!(first.get("name"), Some(&Value::text("Ada & Co")));
        assert_eq!(first.get("weight"), Some(&Value::Null));

        let second = &batch.rows()[1];
        assert_eq!(second.get("name"), Some(&Value::text("Bob <b>")));
        assert_eq!(second.get("height"), Some(&Value::Null));
        assert_eq!(second.get("address.city"), Some(&Value::text("Oslo")));
        assert!(second.get("address").is_none());
    }

    #[test]
    fn test_record_tag_at_any_depth() {
        let doc = r#"<export><meta><count>2</count></meta>
            <items><item><v>1</v></item><item><v>2</v></item></items></export>"#;
        let batch = read_markup(Path::new("e.xml"), doc.as_bytes(), Some("item")).unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.columns(), &["v"]);
        assert_eq!(batch.rows()[1].get("v"), Some(&Value::text("2")));
    }

    #[test]
    fn test_empty_root() {
        let batch = read_markup(Path::new("e.xml"), b"<people/>", None).unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn test_malformed_document() {
        let err = read_markup(Path::new("e.xml"), b"<a><b>1</c></a>", None).unwrap_err();
        assert!(matches!(err, EtlError::SourceRead { .. }));
    }
}
