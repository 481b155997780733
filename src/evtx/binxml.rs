//! BinXML token stream decoder.
//!
//! Records are stored as a fragment that usually instantiates a template:
//! the template body lives once per chunk and each record only carries the
//! substitution values. Parsing happens in two passes: template bodies are
//! decoded into [`Node`] trees that still contain substitution slots, then
//! [`BinXmlParser::instantiate`] fills the slots with the record's values.

use std::collections::HashMap;
use std::rc::Rc;

use crate::evtx::EvtxError;
use crate::evtx::cursor::ByteCursor;
use crate::evtx::value::{TYPE_BINXML, TYPE_NULL, TYPE_STRING, Value};

const TOKEN_EOF: u8 = 0x00;
const TOKEN_OPEN_START_ELEMENT: u8 = 0x01;
const TOKEN_CLOSE_START_ELEMENT: u8 = 0x02;
const TOKEN_CLOSE_EMPTY_ELEMENT: u8 = 0x03;
const TOKEN_END_ELEMENT: u8 = 0x04;
const TOKEN_VALUE: u8 = 0x05;
const TOKEN_ATTRIBUTE: u8 = 0x06;
const TOKEN_CDATA: u8 = 0x07;
const TOKEN_CHAR_REF: u8 = 0x08;
const TOKEN_ENTITY_REF: u8 = 0x09;
const TOKEN_PI_TARGET: u8 = 0x0A;
const TOKEN_PI_DATA: u8 = 0x0B;
const TOKEN_TEMPLATE_INSTANCE: u8 = 0x0C;
const TOKEN_NORMAL_SUBSTITUTION: u8 = 0x0D;
const TOKEN_OPTIONAL_SUBSTITUTION: u8 = 0x0E;
const TOKEN_FRAGMENT_HEADER: u8 = 0x0F;
/// Set on element tokens that carry attributes and on attributes that are
/// followed by another attribute.
const FLAG_MORE: u8 = 0x40;

const MAX_DEPTH: usize = 64;
/// Elements, instantiated nodes and substitutions one record may produce.
const MAX_RECORD_NODES: usize = 1 << 16;
/// next offset, GUID, data size.
const TEMPLATE_HEADER_SIZE: usize = 24;

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(Value),
    Substitution {
        index: u16,
        value_type: u8,
        optional: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: Node,
}

/// Parsed template bodies keyed by definition offset, valid for one chunk.
pub type TemplateCache = HashMap<u32, Rc<Vec<Node>>>;

#[derive(Debug, Clone, Copy)]
struct SubstitutionValue {
    value_type: u8,
    offset: usize,
    size: usize,
}

pub struct BinXmlParser<'c> {
    chunk: &'c [u8],
    templates: &'c mut TemplateCache,
    budget: usize,
}

impl<'c> BinXmlParser<'c> {
    pub fn new(chunk: &'c [u8], templates: &'c mut TemplateCache) -> Self {
        Self {
            chunk,
            templates,
            budget: MAX_RECORD_NODES,
        }
    }

    /// Decode the payload `chunk[start..end]` of one record.
    pub fn parse_record(&mut self, start: usize, end: usize) -> Result<Vec<Node>, EvtxError> {
        self.budget = MAX_RECORD_NODES;
        let mut cur = ByteCursor::at(self.chunk, start, end)?;
        self.parse_fragment(&mut cur, false, 0)
    }

    fn charge(&mut self, offset: usize) -> Result<(), EvtxError> {
        self.budget = self.budget.checked_sub(1).ok_or_else(|| {
            EvtxError::binxml(
                offset,
                format!("record expands beyond {MAX_RECORD_NODES} nodes"),
            )
        })?;
        Ok(())
    }

    fn parse_fragment(
        &mut self,
        cur: &mut ByteCursor<'c>,
        in_substitution: bool,
        depth: usize,
    ) -> Result<Vec<Node>, EvtxError> {
        check_depth(cur, depth)?;
        let mut nodes = Vec::new();
        while cur.remaining() > 0 {
            let token = cur.u8()?;
            match token & !FLAG_MORE {
                TOKEN_EOF => break,
                TOKEN_FRAGMENT_HEADER => cur.skip(3)?,
                TOKEN_TEMPLATE_INSTANCE => {
                    nodes.extend(self.parse_template_instance(cur, depth + 1)?);
                }
                TOKEN_OPEN_START_ELEMENT => {
                    let element = self.parse_element(cur, token, in_substitution, depth + 1)?;
                    nodes.push(Node::Element(element));
                }
                other => {
                    return Err(EvtxError::binxml(
                        cur.position() - 1,
                        format!("unexpected token 0x{other:02x} in fragment"),
                    ));
                }
            }
        }
        Ok(nodes)
    }

    fn parse_element(
        &mut self,
        cur: &mut ByteCursor<'c>,
        token: u8,
        in_substitution: bool,
        depth: usize,
    ) -> Result<Element, EvtxError> {
        check_depth(cur, depth)?;
        self.charge(cur.position())?;
        // Elements inside a BinXML substitution value carry no dependency id.
        if !in_substitution {
            let _dependency_id = cur.u16()?;
        }
        let _data_size = cur.u32()?;
        let name = self.read_name(cur)?;

        let mut attributes = Vec::new();
        if token & FLAG_MORE != 0 {
            let _list_size = cur.u32()?;
            loop {
                let attr_token = cur.u8()?;
                if attr_token & !FLAG_MORE != TOKEN_ATTRIBUTE {
                    return Err(EvtxError::binxml(
                        cur.position() - 1,
                        format!("expected attribute, found token 0x{attr_token:02x}"),
                    ));
                }
                let attr_name = self.read_name(cur)?;
                let value = self.parse_content(cur)?.ok_or_else(|| {
                    EvtxError::binxml(cur.position(), "attribute without a value")
                })?;
                attributes.push(Attribute {
                    name: attr_name,
                    value,
                });
                if attr_token & FLAG_MORE == 0 {
                    break;
                }
            }
        }

        let mut children = Vec::new();
        match cur.u8()? {
            TOKEN_CLOSE_EMPTY_ELEMENT => {}
            TOKEN_CLOSE_START_ELEMENT => loop {
                let next = cur.peek_u8()?;
                match next & !FLAG_MORE {
                    TOKEN_END_ELEMENT => {
                        cur.u8()?;
                        break;
                    }
                    TOKEN_OPEN_START_ELEMENT => {
                        cur.u8()?;
                        let child = self.parse_element(cur, next, in_substitution, depth + 1)?;
                        children.push(Node::Element(child));
                    }
                    TOKEN_TEMPLATE_INSTANCE => {
                        cur.u8()?;
                        children.extend(self.parse_template_instance(cur, depth + 1)?);
                    }
                    _ => {
                        if let Some(node) = self.parse_content(cur)? {
                            children.push(node);
                        }
                    }
                }
            },
            other => {
                return Err(EvtxError::binxml(
                    cur.position() - 1,
                    format!("unexpected token 0x{other:02x} closing <{name}>"),
                ));
            }
        }

        Ok(Element {
            name,
            attributes,
            children,
        })
    }

    /// Character content: values, substitutions and references. Processing
    /// instructions are consumed and yield nothing.
    fn parse_content(&mut self, cur: &mut ByteCursor<'c>) -> Result<Option<Node>, EvtxError> {
        let token = cur.u8()?;
        let node = match token & !FLAG_MORE {
            TOKEN_VALUE => {
                let value_type = cur.u8()?;
                if value_type != TYPE_STRING {
                    return Err(EvtxError::binxml(
                        cur.position() - 1,
                        format!("unsupported inline value type 0x{value_type:02x}"),
                    ));
                }
                Some(Node::Text(Value::String(cur.len_prefixed_utf16()?)))
            }
            TOKEN_NORMAL_SUBSTITUTION | TOKEN_OPTIONAL_SUBSTITUTION => {
                let index = cur.u16()?;
                let value_type = cur.u8()?;
                Some(Node::Substitution {
                    index,
                    value_type,
                    optional: token & !FLAG_MORE == TOKEN_OPTIONAL_SUBSTITUTION,
                })
            }
            TOKEN_CDATA => Some(Node::Text(Value::String(cur.len_prefixed_utf16()?))),
            TOKEN_CHAR_REF => {
                let code = cur.u16()?;
                let ch = char::from_u32(code as u32).unwrap_or(char::REPLACEMENT_CHARACTER);
                Some(Node::Text(Value::String(ch.to_string())))
            }
            TOKEN_ENTITY_REF => {
                let name = self.read_name(cur)?;
                Some(Node::Text(Value::String(resolve_entity(&name))))
            }
            TOKEN_PI_TARGET => {
                self.read_name(cur)?;
                None
            }
            TOKEN_PI_DATA => {
                cur.len_prefixed_utf16()?;
                None
            }
            other => {
                return Err(EvtxError::binxml(
                    cur.position() - 1,
                    format!("unexpected token 0x{other:02x} in content"),
                ));
            }
        };
        Ok(node)
    }

    fn read_name(&mut self, cur: &mut ByteCursor<'c>) -> Result<String, EvtxError> {
        let offset = cur.u32()? as usize;
        let (name, node_len) = read_name_node(self.chunk, offset)?;
        if offset == cur.position() {
            cur.skip(node_len)?;
        }
        Ok(name)
    }

    fn parse_template_instance(
        &mut self,
        cur: &mut ByteCursor<'c>,
        depth: usize,
    ) -> Result<Vec<Node>, EvtxError> {
        check_depth(cur, depth)?;
        let _unknown = cur.u8()?;
        let _template_id = cur.u32()?;
        let def_offset = cur.u32()? as usize;
        if def_offset == cur.position() {
            cur.skip(TEMPLATE_HEADER_SIZE - 4)?;
            let data_size = cur.u32()? as usize;
            cur.skip(data_size)?;
        }
        let template = self.template(def_offset, depth)?;

        let count = cur.u32()? as usize;
        if count.saturating_mul(4) > cur.remaining() {
            return Err(EvtxError::binxml(
                cur.position(),
                format!("substitution count {count} exceeds payload"),
            ));
        }
        let mut descriptors = Vec::with_capacity(count);
        for _ in 0..count {
            let size = cur.u16()? as usize;
            let value_type = cur.u8()?;
            cur.skip(1)?;
            descriptors.push((size, value_type));
        }
        let mut values = Vec::with_capacity(count);
        for (size, value_type) in descriptors {
            let offset = cur.position();
            cur.skip(size)?;
            values.push(SubstitutionValue {
                value_type,
                offset,
                size,
            });
        }

        self.instantiate(&template, &values, depth)
    }

    fn template(&mut self, def_offset: usize, depth: usize) -> Result<Rc<Vec<Node>>, EvtxError> {
        let key = def_offset as u32;
        if let Some(body) = self.templates.get(&key) {
            return Ok(Rc::clone(body));
        }
        let mut header = ByteCursor::at(self.chunk, def_offset, self.chunk.len())?;
        header.skip(TEMPLATE_HEADER_SIZE - 4)?;
        let data_size = header.u32()? as usize;
        let body_start = header.position();
        let mut body = ByteCursor::at(self.chunk, body_start, body_start + data_size)?;
        if body.end() != body_start + data_size {
            return Err(EvtxError::binxml(
                def_offset,
                format!("template body of {data_size} bytes runs past the chunk"),
            ));
        }
        let nodes = Rc::new(self.parse_fragment(&mut body, false, depth + 1)?);
        self.templates.insert(key, Rc::clone(&nodes));
        Ok(nodes)
    }

    fn instantiate(
        &mut self,
        nodes: &[Node],
        values: &[SubstitutionValue],
        depth: usize,
    ) -> Result<Vec<Node>, EvtxError> {
        let mut out = Vec::with_capacity(nodes.len());
        for node in nodes {
            self.charge(0)?;
            match node {
                Node::Element(element) => {
                    out.push(Node::Element(
                        self.instantiate_element(element, values, depth)?,
                    ));
                }
                Node::Text(value) => out.push(Node::Text(value.clone())),
                Node::Substitution {
                    index, optional, ..
                } => out.extend(self.substitute(*index, *optional, values, depth)?),
            }
        }
        Ok(out)
    }

    fn instantiate_element(
        &mut self,
        element: &Element,
        values: &[SubstitutionValue],
        depth: usize,
    ) -> Result<Element, EvtxError> {
        let mut attributes = Vec::with_capacity(element.attributes.len());
        for attr in &element.attributes {
            let value = match &attr.value {
                Node::Substitution {
                    index, optional, ..
                } => {
                    let resolved = self.substitute(*index, *optional, values, depth)?;
                    match resolved.into_iter().next() {
                        Some(text @ Node::Text(_)) => text,
                        _ => continue,
                    }
                }
                other => other.clone(),
            };
            attributes.push(Attribute {
                name: attr.name.clone(),
                value,
            });
        }
        let children = self.instantiate(&element.children, values, depth + 1)?;
        Ok(Element {
            name: element.name.clone(),
            attributes,
            children,
        })
    }

    fn substitute(
        &mut self,
        index: u16,
        optional: bool,
        values: &[SubstitutionValue],
        depth: usize,
    ) -> Result<Vec<Node>, EvtxError> {
        let Some(slot) = values.get(index as usize).copied() else {
            return Err(EvtxError::binxml(
                0,
                format!(
                    "substitution {index} out of range ({} values)",
                    values.len()
                ),
            ));
        };
        if slot.value_type == TYPE_NULL || (optional && slot.size == 0) {
            return Ok(Vec::new());
        }
        self.charge(slot.offset)?;
        if slot.value_type == TYPE_BINXML {
            let mut nested = ByteCursor::at(self.chunk, slot.offset, slot.offset + slot.size)?;
            return self.parse_fragment(&mut nested, true, depth + 1);
        }
        let raw = &self.chunk[slot.offset..slot.offset + slot.size];
        let value = Value::decode(slot.value_type, raw).map_err(|err| match err {
            EvtxError::BinXml { reason, .. } => EvtxError::binxml(slot.offset, reason),
            other => other,
        })?;
        Ok(vec![Node::Text(value)])
    }
}

fn check_depth(cur: &ByteCursor<'_>, depth: usize) -> Result<(), EvtxError> {
    if depth > MAX_DEPTH {
        return Err(EvtxError::binxml(cur.position(), "nesting too deep"));
    }
    Ok(())
}

/// Read the name node at `offset`: next offset, hash, character count,
/// UTF-16 characters and a NUL terminator. Returns the name and node length.
pub fn read_name_node(chunk: &[u8], offset: usize) -> Result<(String, usize), EvtxError> {
    let mut cur = ByteCursor::at(chunk, offset, chunk.len())?;
    let _next = cur.u32()?;
    let _hash = cur.u16()?;
    let chars = cur.u16()? as usize;
    let name = cur.utf16(chars)?;
    cur.skip(2)?;
    Ok((name, cur.position() - offset))
}

fn resolve_entity(name: &str) -> String {
    match name {
        "amp" => "&".to_string(),
        "lt" => "<".to_string(),
        "gt" => ">".to_string(),
        "quot" => "\"".to_string(),
        "apos" => "'".to_string(),
        other => format!("&{other};"),
    }
}
