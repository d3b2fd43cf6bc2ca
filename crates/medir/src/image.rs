//! Unit image codec.
//!
//! A unit image is the compiled form of one class, produced by the external
//! compiler collaborator and addressed by its fully-qualified dotted name.
//! The image carries a method table; each method lists its basic blocks
//! (line number plus instruction/branch weights) and, for test units, the
//! recorded invocation script the bundled runner replays.
//!
//! The encoding is length-prefixed little-endian:
//!
//! ```text
//! magic "UIM1" | version u16 | flags u16
//! name str16 | source_file str16
//! method_count u16
//!   method: name str16 | descriptor str16
//!           block_count u16 | { line u32, instructions u16, branches u16 }*
//!           op_count u16    | { tag u8, payload }*
//! [instrumented only] probe_count u32
//! ```
//!
//! Every block is one probe site. Probe ids are assigned sequentially over
//! methods and blocks in declaration order, so the instrumenter and the
//! analyzer recompute the same assignment from the same bytes.

use thiserror::Error;

/// File extension of stored unit images.
pub const UNIT_EXT: &str = "unit";

const MAGIC: [u8; 4] = *b"UIM1";
const VERSION: u16 = 1;
const FLAG_INSTRUMENTED: u16 = 0x0001;

const OP_INVOKE: u8 = 0;
const OP_SLEEP: u8 = 1;
const OP_FAIL: u8 = 2;
const OP_ABORT: u8 = 3;

/// Errors raised by the codec.
#[derive(Debug, Error)]
pub enum ImageError {
    /// Input ended before the structure was complete.
    #[error("truncated unit image at offset {offset}")]
    Truncated {
        /// Byte offset where more input was required.
        offset: usize,
    },

    /// Leading magic bytes did not match.
    #[error("not a unit image (bad magic)")]
    BadMagic,

    /// Unknown format version.
    #[error("unsupported unit image version {0}")]
    UnsupportedVersion(u16),

    /// Unknown script opcode.
    #[error("unknown script op tag {0}")]
    UnknownOp(u8),

    /// Instrumented trailer disagrees with the method table.
    #[error("probe table declares {declared} probes but the method table has {actual} sites")]
    ProbeCountMismatch {
        /// Count read from the trailer.
        declared: u32,
        /// Count computed from the blocks.
        actual: u32,
    },

    /// Trailing bytes after a complete image.
    #[error("{0} trailing bytes after unit image")]
    TrailingBytes(usize),

    /// A string or table exceeded its length prefix on encode.
    #[error("field too large for encoding: {what}")]
    Oversize {
        /// Which field overflowed.
        what: &'static str,
    },
}

/// One basic block: a probe site with its counter weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockImage {
    /// Source line the block starts on.
    pub line: u32,
    /// Executable instructions in the block.
    pub instructions: u16,
    /// Outgoing branch edges at the block's decision point, 0 if none.
    pub branches: u16,
}

/// One script operation recorded in a test method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOp {
    /// Invoke a target method, executing the listed block indexes.
    Invoke {
        /// Fully-qualified target unit name.
        unit: String,
        /// Target method name.
        method: String,
        /// Indexes into the target method's block table.
        blocks: Vec<u16>,
    },
    /// Busy the worker for the given wall-clock duration.
    Sleep {
        /// Sleep duration in milliseconds.
        millis: u32,
    },
    /// The recorded sub-test failed its assertion.
    Fail {
        /// Assertion message.
        message: String,
    },
    /// The recorded run crashed; aborts the whole test unit.
    Abort {
        /// Crash message.
        message: String,
    },
}

/// One method of a unit image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodImage {
    /// Simple method name.
    pub name: String,
    /// Signature descriptor, e.g. `(i32,i32)->bool`.
    pub descriptor: String,
    /// Basic blocks; empty for test methods.
    pub blocks: Vec<BlockImage>,
    /// Recorded invocation script; empty for target methods.
    pub script: Vec<ScriptOp>,
}

impl MethodImage {
    /// Create a method with no blocks and no script.
    #[must_use]
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            blocks: Vec::new(),
            script: Vec::new(),
        }
    }

    /// Attach basic blocks.
    #[must_use]
    pub fn with_blocks(mut self, blocks: Vec<BlockImage>) -> Self {
        self.blocks = blocks;
        self
    }

    /// Attach a recorded invocation script.
    #[must_use]
    pub fn with_script(mut self, script: Vec<ScriptOp>) -> Self {
        self.script = script;
        self
    }
}

/// A decoded unit image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitImage {
    /// Fully-qualified dotted unit name.
    pub name: String,
    /// Source file label, possibly empty.
    pub source_file: String,
    /// Method table in declaration order.
    pub methods: Vec<MethodImage>,
    /// Whether the probe table has been attached.
    pub instrumented: bool,
}

impl UnitImage {
    /// Create an empty, uninstrumented image.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_file: String::new(),
            methods: Vec::new(),
            instrumented: false,
        }
    }

    /// Set the source file label.
    #[must_use]
    pub fn with_source_file(mut self, source_file: impl Into<String>) -> Self {
        self.source_file = source_file.into();
        self
    }

    /// Append a method.
    #[must_use]
    pub fn with_method(mut self, method: MethodImage) -> Self {
        self.methods.push(method);
        self
    }

    /// Total number of probe sites (one per block, over all methods).
    #[must_use]
    pub fn probe_sites(&self) -> u32 {
        self.methods.iter().map(|m| m.blocks.len() as u32).sum()
    }

    /// Look up a method by simple name.
    #[must_use]
    pub fn method(&self, name: &str) -> Option<&MethodImage> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// First probe id of each method, in declaration order.
    #[must_use]
    pub fn probe_bases(&self) -> Vec<u32> {
        let mut bases = Vec::with_capacity(self.methods.len());
        let mut next = 0u32;
        for method in &self.methods {
            bases.push(next);
            next += method.blocks.len() as u32;
        }
        bases
    }

    /// Decode an image from stored bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, ImageError> {
        let mut r = Reader::new(bytes);
        if r.take(4)? != MAGIC {
            return Err(ImageError::BadMagic);
        }
        let version = r.u16()?;
        if version != VERSION {
            return Err(ImageError::UnsupportedVersion(version));
        }
        let flags = r.u16()?;
        let instrumented = flags & FLAG_INSTRUMENTED != 0;
        let name = r.string()?;
        let source_file = r.string()?;

        let method_count = r.u16()?;
        let mut methods = Vec::with_capacity(method_count as usize);
        for _ in 0..method_count {
            methods.push(Self::decode_method(&mut r)?);
        }

        let image = Self {
            name,
            source_file,
            methods,
            instrumented,
        };

        if instrumented {
            let declared = r.u32()?;
            let actual = image.probe_sites();
            if declared != actual {
                return Err(ImageError::ProbeCountMismatch { declared, actual });
            }
        }
        if !r.is_empty() {
            return Err(ImageError::TrailingBytes(r.remaining()));
        }
        Ok(image)
    }

    fn decode_method(r: &mut Reader<'_>) -> Result<MethodImage, ImageError> {
        let name = r.string()?;
        let descriptor = r.string()?;

        let block_count = r.u16()?;
        let mut blocks = Vec::with_capacity(block_count as usize);
        for _ in 0..block_count {
            blocks.push(BlockImage {
                line: r.u32()?,
                instructions: r.u16()?,
                branches: r.u16()?,
            });
        }

        let op_count = r.u16()?;
        let mut script = Vec::with_capacity(op_count as usize);
        for _ in 0..op_count {
            script.push(Self::decode_op(r)?);
        }

        Ok(MethodImage {
            name,
            descriptor,
            blocks,
            script,
        })
    }

    fn decode_op(r: &mut Reader<'_>) -> Result<ScriptOp, ImageError> {
        let tag = r.u8()?;
        match tag {
            OP_INVOKE => {
                let unit = r.string()?;
                let method = r.string()?;
                let count = r.u16()?;
                let mut blocks = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    blocks.push(r.u16()?);
                }
                Ok(ScriptOp::Invoke {
                    unit,
                    method,
                    blocks,
                })
            }
            OP_SLEEP => Ok(ScriptOp::Sleep { millis: r.u32()? }),
            OP_FAIL => Ok(ScriptOp::Fail {
                message: r.string()?,
            }),
            OP_ABORT => Ok(ScriptOp::Abort {
                message: r.string()?,
            }),
            other => Err(ImageError::UnknownOp(other)),
        }
    }

    /// Encode the image to bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ImageError> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(&MAGIC);
        put_u16(&mut out, VERSION);
        put_u16(
            &mut out,
            if self.instrumented {
                FLAG_INSTRUMENTED
            } else {
                0
            },
        );
        put_string(&mut out, &self.name, "unit name")?;
        put_string(&mut out, &self.source_file, "source file")?;

        put_len16(&mut out, self.methods.len(), "method table")?;
        for method in &self.methods {
            Self::encode_method(&mut out, method)?;
        }

        if self.instrumented {
            put_u32(&mut out, self.probe_sites());
        }
        Ok(out)
    }

    fn encode_method(out: &mut Vec<u8>, method: &MethodImage) -> Result<(), ImageError> {
        put_string(out, &method.name, "method name")?;
        put_string(out, &method.descriptor, "method descriptor")?;

        put_len16(out, method.blocks.len(), "block table")?;
        for block in &method.blocks {
            put_u32(out, block.line);
            put_u16(out, block.instructions);
            put_u16(out, block.branches);
        }

        put_len16(out, method.script.len(), "script")?;
        for op in &method.script {
            Self::encode_op(out, op)?;
        }
        Ok(())
    }

    fn encode_op(out: &mut Vec<u8>, op: &ScriptOp) -> Result<(), ImageError> {
        match op {
            ScriptOp::Invoke {
                unit,
                method,
                blocks,
            } => {
                out.push(OP_INVOKE);
                put_string(out, unit, "invoke target unit")?;
                put_string(out, method, "invoke target method")?;
                put_len16(out, blocks.len(), "invoke block list")?;
                for block in blocks {
                    put_u16(out, *block);
                }
            }
            ScriptOp::Sleep { millis } => {
                out.push(OP_SLEEP);
                put_u32(out, *millis);
            }
            ScriptOp::Fail { message } => {
                out.push(OP_FAIL);
                put_string(out, message, "fail message")?;
            }
            ScriptOp::Abort { message } => {
                out.push(OP_ABORT);
                put_string(out, message, "abort message")?;
            }
        }
        Ok(())
    }

    /// Check the instrumented flag without a full decode.
    pub fn is_instrumented(bytes: &[u8]) -> Result<bool, ImageError> {
        let mut r = Reader::new(bytes);
        if r.take(4)? != MAGIC {
            return Err(ImageError::BadMagic);
        }
        let version = r.u16()?;
        if version != VERSION {
            return Err(ImageError::UnsupportedVersion(version));
        }
        Ok(r.u16()? & FLAG_INSTRUMENTED != 0)
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ImageError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(ImageError::Truncated { offset: self.pos })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ImageError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ImageError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, ImageError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn string(&mut self) -> Result<String, ImageError> {
        let len = self.u16()? as usize;
        let offset = self.pos;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ImageError::Truncated { offset })
    }

    fn is_empty(&self) -> bool {
        self.pos == self.bytes.len()
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_len16(out: &mut Vec<u8>, len: usize, what: &'static str) -> Result<(), ImageError> {
    let len = u16::try_from(len).map_err(|_| ImageError::Oversize { what })?;
    put_u16(out, len);
    Ok(())
}

fn put_string(out: &mut Vec<u8>, s: &str, what: &'static str) -> Result<(), ImageError> {
    put_len16(out, s.len(), what)?;
    out.extend_from_slice(s.as_bytes());
    Ok(())
}
