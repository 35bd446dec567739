use std::io::{Cursor, Read};

use quick_xml::events::Event;
use quick_xml::Reader;

/// Largest `word/document.xml` we inflate. Real resumes are well under 1 MiB.
const MAX_DOCUMENT_XML_BYTES: u64 = 20 * 1024 * 1024;

/// Reads `word/document.xml` and returns one line per non-empty paragraph.
pub(super) fn extract_docx_text(data: &[u8]) -> anyhow::Result<String> {
    extract_with_limit(data, MAX_DOCUMENT_XML_BYTES)
}

fn extract_with_limit(data: &[u8], max_xml_bytes: u64) -> anyhow::Result<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))?;

    let entry = archive.by_name("word/document.xml")?;
    if entry.size() > max_xml_bytes {
        anyhow::bail!(
            "document.xml inflates to {} bytes, limit is {max_xml_bytes}",
            entry.size()
        );
    }

    // The declared size can lie; never read past the limit regardless.
    let mut xml = String::new();
    entry.take(max_xml_bytes + 1).read_to_string(&mut xml)?;
    if xml.len() as u64 > max_xml_bytes {
        anyhow::bail!("document.xml exceeds the {max_xml_bytes} byte limit");
    }

    let mut reader = Reader::from_str(&xml);
    reader.config_mut().trim_text(false);

    let mut current = String::new();
    let mut lines = Vec::new();
    let mut in_paragraph = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"w:p" => {
                in_paragraph = true;
                current.clear();
            }
            Event::End(e) if e.name().as_ref() == b"w:p" => {
                if !current.trim().is_empty() {
                    lines.push(current.trim().to_string());
                }
                current.clear();
                in_paragraph = false;
            }
            Event::Empty(e) if in_paragraph && e.name().as_ref() == b"w:tab" => current.push('\t'),
            Event::Text(e) if in_paragraph => current.push_str(&e.xml_content()?),
            Event::GeneralRef(e) if in_paragraph => {
                if let Some(c) = e.resolve_char_ref()? {
                    current.push(c);
                } else {
                    let entity = e.decode()?;
                    current.push_str(match entity.as_ref() {
                        "amp" => "&",
                        "lt" => "<",
                        "gt" => ">",
                        "quot" => "\"",
                        "apos" => "'",
                        _ => "",
                    });
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(lines.join("\n"))
}
