use std::num::NonZero;

macro_rules! arena_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        ///
        /// IDs are assigned in creation order and never reused, so comparing
        /// IDs compares creation order.
        #[derive(Copy, Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub struct $name(NonZero<u32>);

        impl $name {
            /// Return the underlying u32 value of the ID.
            pub fn as_u32(self) -> u32 {
                self.0.get() - 1
            }

            /// Return the underlying ID value as a usize, for slice indexing.
            pub fn as_usize(self) -> usize {
                self.as_u32() as usize
            }

            /// Construct an ID from a u32 value.
            ///
            /// Panics if the value is `u32::MAX`.
            pub fn from_u32(value: u32) -> $name {
                assert!(value < u32::MAX);

                // Store values offset by one and reserve 0 as a niche to make
                // `Option<ID>` the same size as the ID.
                $name(unsafe {
                    // Safety: `value + 1` cannot be zero
                    NonZero::new_unchecked(value + 1)
                })
            }

            pub(crate) fn from_usize(value: usize) -> $name {
                Self::from_u32(value as u32)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.as_u32().fmt(f)
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.as_u32())
            }
        }
    };
}

arena_id!(NodeId, "ID of a node in a [`Graph`](crate::Graph).");
arena_id!(ValueId, "ID of a value in a [`Graph`](crate::Graph).");

#[cfg(test)]
mod tests {
    use super::{NodeId, ValueId};

    #[test]
    fn test_id_round_trip() {
        let id = NodeId::from_u32(42);
        assert_eq!(id.as_u32(), 42);
        assert_eq!(id.as_usize(), 42);
        assert_eq!(id.to_string(), "42");
        assert_eq!(format!("{:?}", id), "NodeId(42)");
        assert_eq!(format!("{:?}", ValueId::from_u32(0)), "ValueId(0)");
        assert_eq!(
            std::mem::size_of::<Option<NodeId>>(),
            std::mem::size_of::<NodeId>()
        );
    }
}
