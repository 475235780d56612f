//! Register handles
//!
//! Registers are plain indices into the vector or scalar register file.
//! Ownership is tracked separately by [`RegRef`] so a plan can tell which
//! handles it must give back and which it only borrows.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Vector register index (first register of a block)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Vgpr(pub u32);

impl Vgpr {
    /// Register index
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }

    /// Register `n` slots after this one
    #[must_use]
    pub const fn offset(self, n: u32) -> Self {
        Self(self.0 + n)
    }
}

impl fmt::Display for Vgpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Scalar register index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Sgpr(pub u32);

impl Sgpr {
    /// Register `n` slots after this one
    #[must_use]
    pub const fn offset(self, n: u32) -> Self {
        Self(self.0 + n)
    }
}

impl fmt::Display for Sgpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// A register reference plus who is responsible for checking it back in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegRef {
    /// Checked out for this element; the holder returns it to the pool
    Owned(Vgpr),
    /// Long-lived, aliased or reused register; someone else returns it
    Borrowed(Vgpr),
}

impl RegRef {
    /// Underlying register
    #[must_use]
    pub const fn reg(self) -> Vgpr {
        match self {
            Self::Owned(r) | Self::Borrowed(r) => r,
        }
    }

    /// Check if the holder must check this register in
    #[must_use]
    pub const fn is_owned(self) -> bool {
        matches!(self, Self::Owned(_))
    }

    /// Same register, without ownership
    #[must_use]
    pub const fn borrow(self) -> Self {
        Self::Borrowed(self.reg())
    }
}

impl fmt::Display for RegRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owned(r) => write!(f, "{r}"),
            Self::Borrowed(r) => write!(f, "&{r}"),
        }
    }
}

/// Logical address streams of the store path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stream {
    /// Primary output (D)
    Output,
    /// Accumulate source (C)
    Source,
    /// Bias vector
    Bias,
    /// Auxiliary output (E)
    Aux,
    /// Alpha scale vector
    Scale,
}

impl Stream {
    /// All streams in declaration order
    pub const ALL: [Self; 5] = [
        Self::Output,
        Self::Source,
        Self::Bias,
        Self::Aux,
        Self::Scale,
    ];

    /// Short name used in checkout tags
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Output => "writeD",
            Self::Source => "loadC",
            Self::Bias => "loadBias",
            Self::Aux => "loadE",
            Self::Scale => "loadScaleAlphaVec",
        }
    }
}

/// One slot per address stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamRegs<T> {
    /// Primary output
    pub output: T,
    /// Accumulate source
    pub source: T,
    /// Bias
    pub bias: T,
    /// Auxiliary output
    pub aux: T,
    /// Scale vector
    pub scale: T,
}

impl<T> StreamRegs<T> {
    /// Slot for one stream
    pub fn get(&self, stream: Stream) -> &T {
        match stream {
            Stream::Output => &self.output,
            Stream::Source => &self.source,
            Stream::Bias => &self.bias,
            Stream::Aux => &self.aux,
            Stream::Scale => &self.scale,
        }
    }

    /// Mutable slot for one stream
    pub fn get_mut(&mut self, stream: Stream) -> &mut T {
        match stream {
            Stream::Output => &mut self.output,
            Stream::Source => &mut self.source,
            Stream::Bias => &mut self.bias,
            Stream::Aux => &mut self.aux,
            Stream::Scale => &mut self.scale,
        }
    }

    /// Apply `f` to every slot
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> StreamRegs<U> {
        StreamRegs {
            output: f(self.output),
            source: f(self.source),
            bias: f(self.bias),
            aux: f(self.aux),
            scale: f(self.scale),
        }
    }
}

impl<T> StreamRegs<Option<T>> {
    /// Check if every slot is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        Stream::ALL.iter().all(|s| self.get(*s).is_none())
    }
}
