// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::Arch;

macro_rules! impl_address {
    ($address_ty:ident) => {
        impl $address_ty {
            pub const MAX: Self = Self(usize::MAX);
            pub const MIN: Self = Self(usize::MIN);

            #[must_use]
            pub const fn new(n: usize) -> Self {
                Self(n)
            }

            #[inline]
            pub const fn get(&self) -> usize {
                self.0
            }

            /// Adds an unsigned offset to this address, panicking if overflow occurred.
            #[must_use]
            #[inline]
            pub const fn add(self, offset: usize) -> Self {
                Self(self.0 + offset)
            }

            /// Subtracts an unsigned offset from this address, panicking if overflow occurred.
            #[must_use]
            #[inline]
            pub const fn sub(self, offset: usize) -> Self {
                Self(self.0 - offset)
            }

            /// Adds an unsigned offset to this address, returning `None` if overflow occurred.
            #[must_use]
            #[inline]
            pub const fn checked_add(self, offset: usize) -> Option<Self> {
                match self.0.checked_add(offset) {
                    Some(n) => Some(Self(n)),
                    None => None,
                }
            }

            /// Subtracts an unsigned offset from this address, returning `None` if overflow occurred.
            #[must_use]
            #[inline]
            pub const fn checked_sub(self, offset: usize) -> Option<Self> {
                match self.0.checked_sub(offset) {
                    Some(n) => Some(Self(n)),
                    None => None,
                }
            }

            /// Calculates the distance between two addresses in bytes, _where it's known that `self`
            /// is equal to or greater than `origin`_.
            ///
            /// # Panics
            ///
            /// Panics if `self` is less than `origin`.
            #[must_use]
            #[inline]
            pub const fn offset_from_unsigned(self, origin: Self) -> usize {
                let (a, b) = self.0.overflowing_sub(origin.0);
                if b {
                    panic!("attempt to subtract with overflow")
                } else {
                    a
                }
            }

            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[must_use]
            #[inline]
            pub const fn is_aligned_to(&self, align: usize) -> bool {
                assert!(
                    align.is_power_of_two(),
                    "is_aligned_to: align is not a power-of-two"
                );

                self.0 & (align - 1) == 0
            }

            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[must_use]
            #[inline]
            pub const fn align_up(self, align: usize) -> Self {
                assert!(
                    align.is_power_of_two(),
                    "align_up: align is not a power-of-two"
                );

                let aligned = Self(self.0.wrapping_add(align - 1) & 0usize.wrapping_sub(align));
                debug_assert!(aligned.is_aligned_to(align));
                aligned
            }

            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[must_use]
            #[inline]
            pub const fn align_down(self, align: usize) -> Self {
                assert!(
                    align.is_power_of_two(),
                    "align_down: align is not a power-of-two"
                );

                let aligned = Self(self.0 & 0usize.wrapping_sub(align));
                debug_assert!(aligned.0 <= self.0);
                aligned
            }
        }

        impl From<usize> for $address_ty {
            fn from(value: usize) -> Self {
                Self(value)
            }
        }

        impl TryFrom<u64> for $address_ty {
            type Error = <usize as TryFrom<u64>>::Error;

            fn try_from(value: u64) -> Result<Self, Self::Error> {
                usize::try_from(value).map($address_ty)
            }
        }

        impl ::core::fmt::Display for $address_ty {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.write_fmt(format_args!("{:#018x}", self.0)) // 18 digits to account for the leading 0x
            }
        }

        impl ::core::fmt::Debug for $address_ty {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.debug_tuple(stringify!($address_ty))
                    .field(&format_args!("{:#018x}", self.0)) // 18 digits to account for the leading 0x
                    .finish()
            }
        }
    };
}

#[repr(transparent)]
#[derive(Default, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(usize);
impl_address!(VirtualAddress);

impl VirtualAddress {
    /// Returns `true` if this address lies within the address width translated by `A`'s page tables.
    #[must_use]
    #[inline]
    pub const fn is_translatable<A: Arch>(&self) -> bool {
        self.0 & A::UNTRANSLATED_ADDRESS_MASK == 0
    }
}

#[repr(transparent)]
#[derive(Default, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(usize);
impl_address!(PhysicalAddress);
