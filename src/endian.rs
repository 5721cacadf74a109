/// Little endian field access over raw on-disk buffers
pub(crate) trait Little: Sized {
    fn read_le(bytes: &[u8], offset: usize) -> Self;
    fn write_le(self, bytes: &mut [u8], offset: usize);
}

macro_rules! define {
    ($type:ty) => {
        impl Little for $type {
            #[inline]
            fn read_le(bytes: &[u8], offset: usize) -> Self {
                const SIZE: usize = core::mem::size_of::<$type>();
                let mut array = [0u8; SIZE];
                array.copy_from_slice(&bytes[offset..offset + SIZE]);
                <$type>::from_le_bytes(array)
            }

            #[inline]
            fn write_le(self, bytes: &mut [u8], offset: usize) {
                let array = self.to_le_bytes();
                bytes[offset..offset + array.len()].copy_from_slice(&array);
            }
        }
    };
}

define!(u16);
define!(u32);

#[inline]
pub(crate) fn read<T: Little>(bytes: &[u8], offset: usize) -> T {
    T::read_le(bytes, offset)
}

#[inline]
pub(crate) fn write<T: Little>(bytes: &mut [u8], offset: usize, value: T) {
    value.write_le(bytes, offset)
}
