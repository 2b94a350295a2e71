//! Element sizes understood by the update engine.
//!
//! Descriptors are cached per element size, so the engine only ever sees one
//! of four widths. [`ElementKind`] names the usual scalar types and maps
//! them onto those widths.

use crate::update_error::UpdateError;

/// Width of one buffer element in bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ElementSize {
    One = 1,
    Two = 2,
    Four = 4,
    Eight = 8,
}

impl ElementSize {
    pub const ALL: [ElementSize; 4] = [
        ElementSize::One,
        ElementSize::Two,
        ElementSize::Four,
        ElementSize::Eight,
    ];

    #[inline]
    pub const fn bytes(self) -> usize {
        self as usize
    }

    /// Dense slot for per-size caches.
    #[inline]
    pub(crate) const fn slot(self) -> usize {
        match self {
            ElementSize::One => 0,
            ElementSize::Two => 1,
            ElementSize::Four => 2,
            ElementSize::Eight => 3,
        }
    }

    /// Element size of `T`, if supported.
    pub fn of<T>() -> Result<Self, UpdateError> {
        Self::try_from(std::mem::size_of::<T>())
    }
}

impl TryFrom<usize> for ElementSize {
    type Error = UpdateError;

    fn try_from(bytes: usize) -> Result<Self, Self::Error> {
        match bytes {
            1 => Ok(ElementSize::One),
            2 => Ok(ElementSize::Two),
            4 => Ok(ElementSize::Four),
            8 => Ok(ElementSize::Eight),
            other => Err(UpdateError::UnsupportedElementSize(other)),
        }
    }
}

/// Named scalar kinds a caller can exchange.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Char,
    Short,
    Int,
    Float,
    Logical,
    Long,
    LongLong,
    Double,
    /// Any opaque 8-byte payload.
    Generic8,
}

impl ElementKind {
    pub fn size(self) -> ElementSize {
        match self {
            ElementKind::Char => ElementSize::One,
            ElementKind::Short => ElementSize::Two,
            ElementKind::Int | ElementKind::Float | ElementKind::Logical => ElementSize::Four,
            ElementKind::Long => {
                if std::mem::size_of::<std::ffi::c_long>() == 8 {
                    ElementSize::Eight
                } else {
                    ElementSize::Four
                }
            }
            ElementKind::LongLong | ElementKind::Double | ElementKind::Generic8 => {
                ElementSize::Eight
            }
        }
    }
}

impl From<ElementKind> for ElementSize {
    fn from(kind: ElementKind) -> Self {
        kind.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_power_of_two_widths_up_to_eight() {
        let table = [
            (1, ElementSize::One),
            (2, ElementSize::Two),
            (4, ElementSize::Four),
            (8, ElementSize::Eight),
        ];
        for (bytes, want) in table {
            assert_eq!(ElementSize::try_from(bytes).unwrap(), want);
            assert_eq!(want.bytes(), bytes);
        }
        for bad in [0usize, 3, 5, 16] {
            assert_eq!(
                ElementSize::try_from(bad),
                Err(UpdateError::UnsupportedElementSize(bad))
            );
        }
    }

    #[test]
    fn typed_sizes() {
        assert_eq!(ElementSize::of::<f64>().unwrap(), ElementSize::Eight);
        assert_eq!(ElementSize::of::<i32>().unwrap(), ElementSize::Four);
        assert_eq!(ElementSize::of::<u16>().unwrap(), ElementSize::Two);
        assert!(ElementSize::of::<[u8; 3]>().is_err());
    }

    #[test]
    fn kinds_map_to_sizes() {
        assert_eq!(ElementKind::Char.size(), ElementSize::One);
        assert_eq!(ElementKind::Short.size(), ElementSize::Two);
        assert_eq!(ElementSize::from(ElementKind::Float), ElementSize::Four);
        assert_eq!(ElementKind::Double.size(), ElementSize::Eight);
    }

    #[test]
    fn slots_are_dense() {
        let slots: Vec<_> = ElementSize::ALL.iter().map(|s| s.slot()).collect();
        assert_eq!(slots, vec![0, 1, 2, 3]);
    }
}
