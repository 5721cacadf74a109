use derive_more::{Display, From, Into};

/// Global sector index on the virtual drive
#[derive(Copy, Clone, Debug, Default, Display, From, Into, Eq, Ord, PartialOrd, PartialEq)]
pub struct SectorID(u32);

impl SectorID {
    pub(crate) const BOOT: Self = Self(0);

    pub fn offset_from(self, base: Self) -> u32 {
        self.0 - base.0
    }
}

impl<I: Into<u32>> core::ops::Add<I> for SectorID {
    type Output = Self;

    fn add(self, rhs: I) -> Self {
        Self(self.0 + rhs.into())
    }
}

impl<I: Into<u32>> core::ops::AddAssign<I> for SectorID {
    fn add_assign(&mut self, rhs: I) {
        self.0 += rhs.into()
    }
}

#[derive(Copy, Clone, Debug, Default, Display, From, Into, Eq, Ord, PartialOrd, PartialEq)]
pub struct ClusterID(u32);

impl ClusterID {
    pub(crate) const FIRST: Self = Self(2);

    /// Cluster 0 and 1 are reserved, a zero-length file points to cluster 0
    pub fn valid(&self) -> bool {
        self.0 >= Self::FIRST.0
    }

    pub(crate) fn offset(self) -> u32 {
        self.0 - Self::FIRST.0
    }
}

impl<I: Into<u32>> core::ops::Add<I> for ClusterID {
    type Output = Self;

    fn add(self, rhs: I) -> Self {
        Self(self.0 + rhs.into())
    }
}

impl<I: Into<u32>> core::ops::AddAssign<I> for ClusterID {
    fn add_assign(&mut self, rhs: I) {
        self.0 += rhs.into()
    }
}

/// Root directory slot of a file, stable for one mount session
#[derive(Copy, Clone, Debug, Display, Eq, PartialEq)]
pub struct FileID(pub(crate) u8);

impl FileID {
    pub fn slot(&self) -> usize {
        self.0 as usize
    }
}
