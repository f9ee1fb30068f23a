use crate::core::item::{DuplicateKeyPolicy, RecordBatch, RecordSource, RecordSourceResult};
use crate::error::BatchError;
use log::{debug, error};
use quick_xml::escape::{resolve_predefined_entity, unescape};
use quick_xml::events::{BytesRef, BytesStart, Event};
use quick_xml::reader::Reader as XmlReader;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// One XML element with its attributes, text and child elements.
///
/// Only the subtree of the item element currently being read is held in
/// memory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlNode {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    /// Unescaped text content, trimmed.
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|child| child.name == name)
    }

    /// Number of elements in the subtree, this one included.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(XmlNode::count).sum::<usize>()
    }

    fn open(start: &BytesStart) -> Result<Self, BatchError> {
        let mut node = XmlNode::new(String::from_utf8_lossy(start.name().as_ref()));
        for attribute in start.attributes() {
            let attribute = attribute.map_err(|e| {
                BatchError::ItemReader(format!("XML attribute error in <{}>: {}", node.name, e))
            })?;
            let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
            let raw = String::from_utf8_lossy(&attribute.value);
            let value = unescape(&raw)
                .map_err(|e| BatchError::ItemReader(format!("XML attribute {}: {}", key, e)))?
                .into_owned();
            node.attributes.insert(key, value);
        }
        Ok(node)
    }
}

/// Resolves `&name;` and `&#nnn;` / `&#xhh;` references.
fn resolve_reference(reference: &BytesRef) -> Result<String, BatchError> {
    let name = String::from_utf8_lossy(reference);
    let unknown = || BatchError::ItemReader(format!("unknown XML entity &{};", name));

    if let Some(number) = name.strip_prefix('#') {
        let code = match number.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => number.parse(),
        }
        .map_err(|_| unknown())?;
        return char::from_u32(code).map(String::from).ok_or_else(unknown);
    }

    resolve_predefined_entity(&name)
        .map(str::to_string)
        .ok_or_else(unknown)
}

/// A streaming record source over XML documents of the form
/// `<root><productitem ref="code">...</productitem>...</root>`.
///
/// Item elements are recognised by tag name at a fixed depth (the root is
/// depth 0) and keyed by an attribute. A batch is complete once its items
/// contain at least `max_count` elements; every batch holds one item at
/// least. Malformed XML is fatal.
///
/// # Examples
///
/// ```
/// use bulk_import_rs::item::xml::xml_reader::XmlRecordSourceBuilder;
/// use bulk_import_rs::core::item::RecordSource;
///
/// let xml = r#"<catalog>
///     <catalogitem ref="shoes"><label>Shoes &amp; Boots</label></catalogitem>
///     <catalogitem ref="hats"><label>Hats</label></catalogitem>
/// </catalog>"#;
///
/// let source = XmlRecordSourceBuilder::new()
///     .tag("catalogitem")
///     .from_reader(xml.as_bytes());
///
/// let batch = source.read_batch(100).unwrap();
/// assert_eq!(batch.len(), 2);
/// assert_eq!(batch.get("shoes").unwrap().child("label").unwrap().text, "Shoes & Boots");
/// ```
pub struct XmlRecordSource<R> {
    reader: RefCell<Option<XmlReader<BufReader<R>>>>,
    /// Item that ended the previous batch as a duplicate.
    pending: RefCell<Option<(String, XmlNode)>>,
    buffer: RefCell<Vec<u8>>,
    path: Option<PathBuf>,
    tag: Vec<u8>,
    item_depth: usize,
    key_attribute: String,
    duplicates: DuplicateKeyPolicy,
    depth: Cell<usize>,
}

impl<R: Read> XmlRecordSource<R> {
    fn parse_error(&self, reader: &XmlReader<BufReader<R>>, e: impl std::fmt::Display) -> BatchError {
        let location = self
            .path
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "<stream>".to_string());
        let message = format!(
            "XML parsing error in {} at byte {}: {}",
            location,
            reader.buffer_position(),
            e
        );
        error!("{}", message);
        BatchError::ItemReader(message)
    }

    /// Reads up to and including the next item element.
    fn next_node(
        &self,
        reader: &mut XmlReader<BufReader<R>>,
        buffer: &mut Vec<u8>,
    ) -> Result<Option<XmlNode>, BatchError> {
        loop {
            buffer.clear();
            let root = {
                let event = reader
                    .read_event_into(buffer)
                    .map_err(|e| self.parse_error(reader, e))?;

                match event {
                    Event::Start(ref start) if self.is_item(start) => XmlNode::open(start)?,
                    Event::Start(_) => {
                        self.depth.set(self.depth.get() + 1);
                        continue;
                    }
                    Event::Empty(ref start) if self.is_item(start) => {
                        return XmlNode::open(start).map(Some);
                    }
                    Event::End(_) => {
                        self.depth.set(self.depth.get().saturating_sub(1));
                        continue;
                    }
                    Event::Eof => {
                        if self.depth.get() > 0 {
                            return Err(self.parse_error(reader, "unexpected end of document"));
                        }
                        debug!("Reached end of document");
                        return Ok(None);
                    }
                    _ => continue,
                }
            };

            return self.read_subtree(reader, buffer, root).map(Some);
        }
    }

    fn is_item(&self, start: &BytesStart) -> bool {
        self.depth.get() == self.item_depth && start.name().as_ref() == self.tag.as_slice()
    }

    /// Materialises the element opened by `root`, consuming its end tag.
    fn read_subtree(
        &self,
        reader: &mut XmlReader<BufReader<R>>,
        buffer: &mut Vec<u8>,
        root: XmlNode,
    ) -> Result<XmlNode, BatchError> {
        let mut stack = vec![root];

        loop {
            buffer.clear();
            let event = reader
                .read_event_into(buffer)
                .map_err(|e| self.parse_error(reader, e))?;

            // the stack is never empty while reading a subtree
            let Some(current) = stack.last_mut() else {
                return Err(self.parse_error(reader, "unbalanced item element"));
            };

            match event {
                Event::Start(ref start) => stack.push(XmlNode::open(start)?),
                Event::Empty(ref start) => current.children.push(XmlNode::open(start)?),
                Event::Text(ref text) => current.text.push_str(&String::from_utf8_lossy(text)),
                Event::CData(ref data) => current.text.push_str(&String::from_utf8_lossy(data)),
                Event::GeneralRef(ref reference) => {
                    current.text.push_str(&resolve_reference(reference)?)
                }
                Event::End(_) => {
                    let mut node = stack.pop().unwrap_or_default();
                    node.text = node.text.trim().to_string();
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None => return Ok(node),
                    }
                }
                Event::Eof => {
                    return Err(self.parse_error(reader, "unexpected end of document"));
                }
                _ => {}
            }
        }
    }
}

impl<R: Read> RecordSource<XmlNode> for XmlRecordSource<R> {
    fn read_batch(&self, max_count: usize) -> RecordSourceResult<XmlNode> {
        let mut batch = RecordBatch::new(self.duplicates);
        let mut guard = self.reader.borrow_mut();
        let Some(reader) = guard.as_mut() else {
            return Ok(batch);
        };
        let mut buffer = self.buffer.borrow_mut();

        let mut nodes = 0;
        if let Some((code, node)) = self.pending.borrow_mut().take() {
            nodes += node.count();
            batch.push(code, node);
        }

        while nodes < max_count {
            let Some(node) = self.next_node(reader, &mut buffer)? else {
                break;
            };

            let count = node.count();
            let code = node
                .attribute(&self.key_attribute)
                .map(str::trim)
                .unwrap_or_default()
                .to_string();
            if code.is_empty() {
                batch.reject(format!(
                    "<{}> without \"{}\" attribute",
                    node.name, self.key_attribute
                ));
            } else if !batch.accepts(&code) {
                debug!("Code {} repeats, ending batch", code);
                *self.pending.borrow_mut() = Some((code, node));
                break;
            } else {
                batch.push(code, node);
            }
            nodes += count;
        }

        debug!("Read {} XML element(s) into {} record(s)", nodes, batch.len());
        Ok(batch)
    }

    fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn close(&self) -> Result<(), BatchError> {
        self.reader.borrow_mut().take();
        self.pending.borrow_mut().take();
        Ok(())
    }
}

/// A builder for [`XmlRecordSource`].
///
/// Defaults: tag `item`, item depth 1, key attribute `ref`, a repeated code
/// starts a new batch.
pub struct XmlRecordSourceBuilder {
    tag: String,
    item_depth: usize,
    key_attribute: String,
    duplicates: DuplicateKeyPolicy,
    capacity: usize,
}

impl Default for XmlRecordSourceBuilder {
    fn default() -> Self {
        Self {
            tag: "item".to_string(),
            item_depth: 1,
            key_attribute: "ref".to_string(),
            duplicates: DuplicateKeyPolicy::default(),
            capacity: 8 * 1024,
        }
    }
}

impl XmlRecordSourceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag<S: AsRef<str>>(mut self, tag: S) -> Self {
        self.tag = tag.as_ref().to_string();
        self
    }

    pub fn item_depth(mut self, item_depth: usize) -> Self {
        self.item_depth = item_depth;
        self
    }

    pub fn key_attribute<S: AsRef<str>>(mut self, key_attribute: S) -> Self {
        self.key_attribute = key_attribute.as_ref().to_string();
        self
    }

    pub fn duplicates(mut self, duplicates: DuplicateKeyPolicy) -> Self {
        self.duplicates = duplicates;
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn from_reader<R: Read>(self, rdr: R) -> XmlRecordSource<R> {
        self.build(rdr, None)
    }

    pub fn from_path<P: AsRef<Path>>(self, path: P) -> Result<XmlRecordSource<File>, BatchError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            BatchError::ItemReader(format!("Failed to open XML file {}: {}", path.display(), e))
        })?;
        Ok(self.build(file, Some(path.to_path_buf())))
    }

    fn build<R: Read>(self, rdr: R, path: Option<PathBuf>) -> XmlRecordSource<R> {
        let reader = XmlReader::from_reader(BufReader::with_capacity(self.capacity, rdr));

        XmlRecordSource {
            reader: RefCell::new(Some(reader)),
            pending: RefCell::new(None),
            buffer: RefCell::new(Vec::with_capacity(1024)),
            path,
            tag: self.tag.into_bytes(),
            item_depth: self.item_depth,
            key_attribute: self.key_attribute,
            duplicates: self.duplicates,
            depth: Cell::new(0),
        }
    }
}
