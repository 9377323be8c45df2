//! PackStream marker bytes.

pub const NULL: u8 = 0xC0;
pub const FLOAT_64: u8 = 0xC1;
pub const FALSE: u8 = 0xC2;
pub const TRUE: u8 = 0xC3;

pub const INT_8: u8 = 0xC8;
pub const INT_16: u8 = 0xC9;
pub const INT_32: u8 = 0xCA;
pub const INT_64: u8 = 0xCB;

/// Tiny integers occupy the marker byte itself.
pub const TINY_INT_MIN: i64 = -16;
pub const TINY_INT_MAX: i64 = 127;

pub const TINY_STRUCT: u8 = 0xB0;
pub const STRUCT_MAX_FIELDS: usize = 15;

/// A family of size-prefixed markers: optional tiny form with the size in
/// the low nibble, then 8, 16 and 32-bit size prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizedMarker {
    pub tiny: Option<u8>,
    pub size_8: u8,
    pub size_16: u8,
    pub size_32: u8,
}

pub const BYTES: SizedMarker = SizedMarker {
    tiny: None,
    size_8: 0xCC,
    size_16: 0xCD,
    size_32: 0xCE,
};

pub const STRING: SizedMarker = SizedMarker {
    tiny: Some(0x80),
    size_8: 0xD0,
    size_16: 0xD1,
    size_32: 0xD2,
};

pub const LIST: SizedMarker = SizedMarker {
    tiny: Some(0x90),
    size_8: 0xD4,
    size_16: 0xD5,
    size_32: 0xD6,
};

pub const DICT: SizedMarker = SizedMarker {
    tiny: Some(0xA0),
    size_8: 0xD8,
    size_16: 0xD9,
    size_32: 0xDA,
};

impl SizedMarker {
    /// Width in bytes of the size prefix that follows `marker`, or `None` if
    /// the marker is not one of this family's long forms.
    pub fn prefix_width(&self, marker: u8) -> Option<usize> {
        match marker {
            m if m == self.size_8 => Some(1),
            m if m == self.size_16 => Some(2),
            m if m == self.size_32 => Some(4),
            _ => None,
        }
    }

    /// Size carried in a tiny marker's low nibble.
    pub fn tiny_size(&self, marker: u8) -> Option<usize> {
        self.tiny
            .filter(|nibble| marker & 0xF0 == *nibble)
            .map(|_| usize::from(marker & 0x0F))
    }
}
