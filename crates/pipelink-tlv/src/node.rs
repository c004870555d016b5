use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, TlvError};

/// Encoded node header: flag/type byte (1) + value length (4).
pub const HEADER_SIZE: usize = 5;

/// Mask selecting the 7-bit type code from the header byte.
pub const TYPE_MASK: u8 = 0x7F;

/// High bit of the header byte: set when the node is a parent.
pub const PARENT_FLAG: u8 = 0x80;

/// Maximum nesting depth the decoder accepts.
///
/// Every level costs at least [`HEADER_SIZE`] bytes, so hostile input could
/// otherwise nest deep enough to exhaust the stack.
pub const MAX_NESTING_DEPTH: usize = 128;

/// A typed, length-delimited binary tree node.
///
/// Leaves own an opaque byte payload. Parents own child nodes, grouped by
/// child type code and insertion-ordered within each group. `full_size` is
/// maintained on every mutation and always equals the exact encoded size.
#[derive(Debug, Clone, PartialEq)]
pub struct Tlv {
    type_code: u8,
    full_size: u32,
    node: Node,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf(Vec<u8>),
    Parent(BTreeMap<u8, Vec<Tlv>>),
}

impl Tlv {
    /// Create a leaf node carrying `data`. Empty payloads are permitted.
    pub fn new_leaf(type_code: u8, data: impl Into<Vec<u8>>) -> Result<Self> {
        check_type(type_code)?;
        let data = data.into();
        let value_len = u32::try_from(data.len()).map_err(|_| TlvError::Oversize)?;
        let full_size = value_len
            .checked_add(HEADER_SIZE as u32)
            .ok_or(TlvError::Oversize)?;
        Ok(Self {
            type_code,
            full_size,
            node: Node::Leaf(data),
        })
    }

    /// Create a parent node with no children yet.
    pub fn new_parent(type_code: u8) -> Result<Self> {
        check_type(type_code)?;
        Ok(Self {
            type_code,
            full_size: HEADER_SIZE as u32,
            node: Node::Parent(BTreeMap::new()),
        })
    }

    /// The node's 7-bit type code.
    pub fn type_code(&self) -> u8 {
        self.type_code
    }

    /// Whether this node is a parent.
    pub fn is_parent(&self) -> bool {
        matches!(self.node, Node::Parent(_))
    }

    /// The exact number of bytes this node occupies on the wire.
    pub fn full_size(&self) -> u32 {
        self.full_size
    }

    /// The encoded value length (everything after the 5-byte header).
    pub fn value_len(&self) -> u32 {
        self.full_size - HEADER_SIZE as u32
    }

    /// Borrow the leaf payload, or `None` for a parent.
    pub fn data(&self) -> Option<&[u8]> {
        match &self.node {
            Node::Leaf(data) => Some(data),
            Node::Parent(_) => None,
        }
    }

    /// Append `child` to its type group, creating the group on demand.
    ///
    /// Fails on a leaf receiver and when the combined size would overflow
    /// the u32 wire length.
    pub fn add_child(&mut self, child: Tlv) -> Result<()> {
        let full_size = self
            .full_size
            .checked_add(child.full_size)
            .ok_or(TlvError::Oversize)?;
        match &mut self.node {
            Node::Leaf(_) => Err(TlvError::NotParent {
                type_code: self.type_code,
            }),
            Node::Parent(children) => {
                children.entry(child.type_code).or_default().push(child);
                self.full_size = full_size;
                Ok(())
            }
        }
    }

    /// The `index`-th child of type `type_code`, in insertion order.
    pub fn get_child(&self, type_code: u8, index: usize) -> Option<&Tlv> {
        match &self.node {
            Node::Leaf(_) => None,
            Node::Parent(children) => children.get(&type_code)?.get(index),
        }
    }

    /// Number of children of type `type_code`. Zero for leaves and for
    /// absent groups.
    pub fn get_child_count(&self, type_code: u8) -> usize {
        match &self.node {
            Node::Leaf(_) => 0,
            Node::Parent(children) => children.get(&type_code).map_or(0, Vec::len),
        }
    }

    /// Decode one node from the front of `buf`.
    ///
    /// Trailing bytes after the node are permitted and ignored; the node
    /// reports how much it consumed via [`Tlv::full_size`]. Value lengths
    /// are validated against the remaining input before any copy is made,
    /// at every recursion level.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        Self::decode_at(buf, 0)
    }

    fn decode_at(buf: &[u8], depth: usize) -> Result<Self> {
        if depth > MAX_NESTING_DEPTH {
            return Err(TlvError::DepthExceeded {
                max: MAX_NESTING_DEPTH,
            });
        }
        if buf.len() < HEADER_SIZE {
            return Err(TlvError::Truncated {
                needed: HEADER_SIZE,
                available: buf.len(),
            });
        }

        let type_code = buf[0] & TYPE_MASK;
        let is_parent = buf[0] & PARENT_FLAG != 0;
        let value_len = u32::from_le_bytes(buf[1..HEADER_SIZE].try_into().unwrap()) as usize;

        let needed = HEADER_SIZE
            .checked_add(value_len)
            .ok_or(TlvError::Oversize)?;
        let value = buf
            .get(HEADER_SIZE..needed)
            .ok_or(TlvError::Truncated {
                needed,
                available: buf.len(),
            })?;
        let full_size = (value_len as u32)
            .checked_add(HEADER_SIZE as u32)
            .ok_or(TlvError::Oversize)?;

        if !is_parent {
            return Ok(Self {
                type_code,
                full_size,
                node: Node::Leaf(value.to_vec()),
            });
        }

        let mut children: BTreeMap<u8, Vec<Tlv>> = BTreeMap::new();
        let mut offset = 0usize;
        while offset < value.len() {
            let child = Self::decode_at(&value[offset..], depth + 1)?;
            // A child cannot overrun the parent's value: it was decoded from
            // a slice that ends where the value ends.
            offset += child.full_size as usize;
            children.entry(child.type_code).or_default().push(child);
        }

        Ok(Self {
            type_code,
            full_size,
            node: Node::Parent(children),
        })
    }

    /// Encode this node, producing exactly [`Tlv::full_size`] bytes.
    ///
    /// Child groups are written in ascending type order, children within a
    /// group in insertion order; the layout is stable across a
    /// decode/encode round trip.
    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(self.full_size as usize);
        self.encode_into(&mut dst);
        debug_assert_eq!(dst.len(), self.full_size as usize);
        dst.freeze()
    }

    /// Encode this node into `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        let flag = if self.is_parent() { PARENT_FLAG } else { 0 };
        dst.put_u8(flag | self.type_code);
        dst.put_u32_le(self.value_len());
        match &self.node {
            Node::Leaf(data) => dst.put_slice(data),
            Node::Parent(children) => {
                for group in children.values() {
                    for child in group {
                        child.encode_into(dst);
                    }
                }
            }
        }
    }

    /// Unsigned 8-bit payload.
    pub fn as_u8(&self) -> Result<u8> {
        Ok(self.fixed::<1>()?[0])
    }

    /// Signed 8-bit payload.
    pub fn as_i8(&self) -> Result<i8> {
        Ok(self.fixed::<1>()?[0] as i8)
    }

    /// Boolean payload: one byte, false iff zero.
    pub fn as_bool(&self) -> Result<bool> {
        Ok(self.fixed::<1>()?[0] != 0)
    }

    /// Unsigned 16-bit little-endian payload.
    pub fn as_u16(&self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.fixed()?))
    }

    /// Signed 16-bit little-endian payload.
    pub fn as_i16(&self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.fixed()?))
    }

    /// Unsigned 32-bit little-endian payload.
    pub fn as_u32(&self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.fixed()?))
    }

    /// Signed 32-bit little-endian payload.
    pub fn as_i32(&self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.fixed()?))
    }

    /// Unsigned 64-bit little-endian payload.
    pub fn as_u64(&self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.fixed()?))
    }

    /// Signed 64-bit little-endian payload.
    pub fn as_i64(&self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.fixed()?))
    }

    /// IEEE-754 single-precision little-endian payload.
    pub fn as_f32(&self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.fixed()?))
    }

    /// IEEE-754 double-precision little-endian payload.
    pub fn as_f64(&self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.fixed()?))
    }

    /// Payload decoded as UTF-8. Invalid sequences are replaced; producers
    /// are responsible for sending valid text.
    pub fn as_string(&self) -> Result<String> {
        let data = self.leaf_data()?;
        Ok(String::from_utf8_lossy(data).into_owned())
    }

    /// Owned copy of the payload. The returned buffer never aliases the
    /// node's storage.
    pub fn as_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.leaf_data()?.to_vec())
    }

    fn leaf_data(&self) -> Result<&[u8]> {
        self.data().ok_or(TlvError::NotLeaf {
            type_code: self.type_code,
        })
    }

    fn fixed<const N: usize>(&self) -> Result<[u8; N]> {
        let data = self.leaf_data()?;
        data.try_into().map_err(|_| TlvError::Width {
            expected: N,
            actual: data.len(),
        })
    }
}

fn check_type(type_code: u8) -> Result<()> {
    if type_code & PARENT_FLAG != 0 {
        return Err(TlvError::InvalidType(type_code));
    }
    Ok(())
}
