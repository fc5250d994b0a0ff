//! `.xlsx` reader
//!
//! Cell values come from calamine. calamine exposes no picture anchors, so
//! pictures are located by walking the package parts directly:
//! workbook -> sheet rels -> drawing -> drawing rels -> media.

use super::{DocumentSource, SheetData};
use crate::codec::dates;
use crate::error::{TabulaError, TabulaResult};
use crate::types::CellValue;
use calamine::{Data, Reader, Xlsx};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader as XmlReader;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use zip::ZipArchive;

const DRAWING_REL: &str = "/drawing";

pub struct XlsxReader {
    bytes: Arc<[u8]>,
    workbook: Xlsx<Cursor<Arc<[u8]>>>,
}

impl XlsxReader {
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> TabulaResult<Self> {
        let bytes: Arc<[u8]> = bytes.into();
        let workbook = Xlsx::new(Cursor::new(Arc::clone(&bytes)))
            .map_err(|e| TabulaError::document("open workbook", "", e))?;
        Ok(Self { bytes, workbook })
    }

    pub fn from_reader(mut input: impl Read) -> TabulaResult<Self> {
        let mut buf = Vec::new();
        input.read_to_end(&mut buf)?;
        Self::from_bytes(buf)
    }

    pub fn open(path: &Path) -> TabulaResult<Self> {
        let bytes = std::fs::read(path).map_err(|source| TabulaError::Resource {
            target: path.display().to_string(),
            source,
        })?;
        Self::from_bytes(bytes)
    }

    /// Pictures anchored on `sheet`, keyed by top-left `(row, col)`.
    /// Any malformed drawing part yields an empty map.
    fn pictures(&self, sheet: &str) -> HashMap<(u32, u16), Vec<u8>> {
        match self.try_pictures(sheet) {
            Ok(found) => found,
            Err(e) => {
                debug!(sheet, error = %e, "Unreadable drawing part; pictures skipped");
                HashMap::new()
            }
        }
    }

    fn try_pictures(&self, sheet: &str) -> Result<HashMap<(u32, u16), Vec<u8>>, String> {
        let mut zip = ZipArchive::new(Cursor::new(&self.bytes[..])).map_err(|e| e.to_string())?;
        let mut found = HashMap::new();

        let Some(workbook_xml) = read_part(&mut zip, "xl/workbook.xml")? else {
            return Ok(found);
        };
        let Some(workbook_rels) = read_part(&mut zip, "xl/_rels/workbook.xml.rels")? else {
            return Ok(found);
        };
        let Some(rid) = parse_sheet_ids(&workbook_xml)?
            .into_iter()
            .find(|(name, _)| name == sheet)
            .map(|(_, rid)| rid)
        else {
            return Ok(found);
        };
        let rels = parse_relationships(&workbook_rels)?;
        let Some((_, target)) = rels.get(&rid) else {
            return Ok(found);
        };
        let sheet_path = resolve("xl/", target);

        let Some(sheet_rels) = read_part(&mut zip, &rels_path(&sheet_path))? else {
            return Ok(found);
        };
        for (kind, target) in parse_relationships(&sheet_rels)?.into_values() {
            if !kind.ends_with(DRAWING_REL) {
                continue;
            }
            let drawing_path = resolve(dir_of(&sheet_path), &target);
            let Some(drawing_xml) = read_part(&mut zip, &drawing_path)? else {
                continue;
            };
            let drawing_rels = read_part(&mut zip, &rels_path(&drawing_path))?
                .map(|xml| parse_relationships(&xml))
                .transpose()?
                .unwrap_or_default();

            for anchor in parse_anchors(&drawing_xml)? {
                let Some((_, media)) = drawing_rels.get(&anchor.embed) else {
                    continue;
                };
                let media_path = resolve(dir_of(&drawing_path), media);
                if let Some(bytes) = read_bytes(&mut zip, &media_path)? {
                    found.insert((anchor.row, anchor.col), bytes);
                }
            }
        }
        Ok(found)
    }
}

impl DocumentSource for XlsxReader {
    fn sheet_names(&self) -> Vec<String> {
        self.workbook.sheet_names()
    }

    fn read_sheet(&mut self, name: &str) -> TabulaResult<SheetData> {
        if !self.workbook.sheet_names().iter().any(|s| s == name) {
            return Err(TabulaError::document("read sheet", name, "sheet not found"));
        }
        let range = self
            .workbook
            .worksheet_range(name)
            .map_err(|e| TabulaError::document("read sheet", name, e))?;

        let mut data = SheetData::new(name);
        if let Some((row0, col0)) = range.start() {
            for (i, row) in range.rows().enumerate() {
                for (j, cell) in row.iter().enumerate() {
                    let value = to_cell_value(cell);
                    if value != CellValue::Empty {
                        data.set(row0 + i as u32, (col0 as usize + j) as u16, value);
                    }
                }
            }
        }
        for ((row, col), bytes) in self.pictures(name) {
            data.add_picture(row, col, bytes);
        }
        debug!(sheet = name, last_row = ?data.last_row(), pictures = data.picture_count(), "Sheet read");
        Ok(data)
    }
}

/// Map a calamine cell. Date-formatted numbers become timestamps.
pub(crate) fn to_cell_value(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Empty,
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Float(f) => CellValue::Number(*f),
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) if dt.is_datetime() => dates::from_serial(dt.as_f64())
            .map_or(CellValue::Number(dt.as_f64()), CellValue::DateTime),
        Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
        Data::DateTimeIso(s) => chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
            .map(CellValue::DateTime)
            .unwrap_or_else(|_| CellValue::Text(s.clone())),
        Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Error(e) => CellValue::Error(e.to_string()),
    }
}

//==============================================================================
// Package parts
//==============================================================================

struct Anchor {
    row: u32,
    col: u16,
    embed: String,
}

fn read_part<R: Read + std::io::Seek>(
    zip: &mut ZipArchive<R>,
    path: &str,
) -> Result<Option<String>, String> {
    read_bytes(zip, path)?
        .map(|b| String::from_utf8(b).map_err(|e| format!("{path}: {e}")))
        .transpose()
}

fn read_bytes<R: Read + std::io::Seek>(
    zip: &mut ZipArchive<R>,
    path: &str,
) -> Result<Option<Vec<u8>>, String> {
    let mut file = match zip.by_name(path) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(format!("{path}: {e}")),
    };
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .map_err(|e| format!("{path}: {e}"))?;
    Ok(Some(buf))
}

fn rels_path(part: &str) -> String {
    let (dir, file) = part.rsplit_once('/').unwrap_or(("", part));
    if dir.is_empty() {
        format!("_rels/{file}.rels")
    } else {
        format!("{dir}/_rels/{file}.rels")
    }
}

fn dir_of(path: &str) -> &str {
    path.rfind('/').map_or("", |i| &path[..=i])
}

/// Join a relationship target onto a base directory, folding `..`
fn resolve(base: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut parts: Vec<&str> = base.split('/').filter(|p| !p.is_empty()).collect();
    for piece in target.split('/') {
        match piece {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

fn attr(e: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == local)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// `(sheet name, relationship id)` from `xl/workbook.xml`
fn parse_sheet_ids(xml: &str) -> Result<Vec<(String, String)>, String> {
    let mut reader = XmlReader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut sheets = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sheet" => {
                if let (Some(name), Some(rid)) = (attr(&e, b"name"), attr(&e, b"id")) {
                    sheets.push((name, rid));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("workbook.xml: {e}")),
            _ => {}
        }
        buf.clear();
    }
    Ok(sheets)
}

/// `Id -> (Type, Target)` from a `.rels` part
fn parse_relationships(xml: &str) -> Result<HashMap<String, (String, String)>, String> {
    let mut reader = XmlReader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut rels = HashMap::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if let (Some(id), Some(target)) = (attr(&e, b"Id"), attr(&e, b"Target")) {
                    rels.insert(id, (attr(&e, b"Type").unwrap_or_default(), target));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("relationships: {e}")),
            _ => {}
        }
        buf.clear();
    }
    Ok(rels)
}

/// Top-left cell and embedded blip id of every picture anchor
fn parse_anchors(xml: &str) -> Result<Vec<Anchor>, String> {
    #[derive(PartialEq)]
    enum Field {
        None,
        Col,
        Row,
    }

    let mut reader = XmlReader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut anchors = Vec::new();

    let mut in_from = false;
    let mut field = Field::None;
    let (mut row, mut col, mut embed) = (None::<u32>, None::<u16>, None::<String>);

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"twoCellAnchor" | b"oneCellAnchor" => {
                    row = None;
                    col = None;
                    embed = None;
                }
                b"from" => in_from = true,
                b"col" if in_from => field = Field::Col,
                b"row" if in_from => field = Field::Row,
                b"blip" => embed = attr(&e, b"embed"),
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"blip" => {
                embed = attr(&e, b"embed");
            }
            Ok(Event::Text(t)) if field != Field::None => {
                let text = t.unescape().map_err(|e| format!("drawing: {e}"))?;
                match field {
                    Field::Col => col = text.trim().parse().ok(),
                    Field::Row => row = text.trim().parse().ok(),
                    Field::None => {}
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"from" => in_from = false,
                b"col" | b"row" => field = Field::None,
                b"twoCellAnchor" | b"oneCellAnchor" => {
                    if let (Some(row), Some(col), Some(embed)) = (row, col, embed.take()) {
                        anchors.push(Anchor { row, col, embed });
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("drawing: {e}")),
            _ => {}
        }
        buf.clear();
    }
    Ok(anchors)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DRAWING: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xdr:wsDr xmlns:xdr="http://schemas.openxmlformats.org/drawingml/2006/spreadsheetDrawing"
          xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main"
          xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
  <xdr:twoCellAnchor editAs="oneCell">
    <xdr:from><xdr:col>3</xdr:col><xdr:colOff>0</xdr:colOff><xdr:row>2</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:from>
    <xdr:to><xdr:col>4</xdr:col><xdr:colOff>0</xdr:colOff><xdr:row>3</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:to>
    <xdr:pic><xdr:blipFill><a:blip r:embed="rId1"/></xdr:blipFill></xdr:pic>
    <xdr:clientData/>
  </xdr:twoCellAnchor>
</xdr:wsDr>"#;

    #[test]
    fn test_parse_anchor_from_cell() {
        let anchors = parse_anchors(DRAWING).unwrap();
        assert_eq!(anchors.len(), 1);
        assert_eq!((anchors[0].row, anchors[0].col), (2, 3));
        assert_eq!(anchors[0].embed, "rId1");
    }

    #[test]
    fn test_parse_relationships() {
        let xml = r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/drawing" Target="../drawings/drawing1.xml"/>
</Relationships>"#;
        let rels = parse_relationships(xml).unwrap();
        let (kind, target) = &rels["rId1"];
        assert!(kind.ends_with(DRAWING_REL));
        assert_eq!(target, "../drawings/drawing1.xml");
    }

    #[test]
    fn test_parse_sheet_ids() {
        let xml = r#"<workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
<sheets><sheet name="Users" sheetId="1" r:id="rId1"/><sheet name="Users1" sheetId="2" r:id="rId2"/></sheets></workbook>"#;
        let ids = parse_sheet_ids(xml).unwrap();
        assert_eq!(ids[1], ("Users1".to_string(), "rId2".to_string()));
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(resolve("xl/worksheets/", "../drawings/drawing1.xml"), "xl/drawings/drawing1.xml");
        assert_eq!(resolve("xl/", "worksheets/sheet1.xml"), "xl/worksheets/sheet1.xml");
        assert_eq!(resolve("xl/", "/xl/media/image1.png"), "xl/media/image1.png");
        assert_eq!(rels_path("xl/worksheets/sheet1.xml"), "xl/worksheets/_rels/sheet1.xml.rels");
        assert_eq!(dir_of("xl/drawings/drawing1.xml"), "xl/drawings/");
    }

    #[test]
    fn test_to_cell_value() {
        assert_eq!(to_cell_value(&Data::Int(3)), CellValue::Number(3.0));
        assert_eq!(to_cell_value(&Data::String("x".into())), CellValue::Text("x".into()));
        assert_eq!(to_cell_value(&Data::Empty), CellValue::Empty);
    }

    #[test]
    fn test_rejects_non_xlsx_bytes() {
        assert!(XlsxReader::from_bytes(b"not a zip".to_vec()).is_err());
    }
}
