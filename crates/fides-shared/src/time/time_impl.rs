use std::ops::{Add, AddAssign, Sub, SubAssign};

use crate::time::Duration;

impl Add<Duration> for time::OffsetDateTime {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        self.add(*rhs)
    }
}

impl AddAssign<Duration> for time::OffsetDateTime {
    fn add_assign(&mut self, rhs: Duration) {
        self.add_assign(*rhs);
    }
}

impl Sub<Duration> for time::OffsetDateTime {
    type Output = Self;

    fn sub(self, rhs: Duration) -> Self::Output {
        self.sub(*rhs)
    }
}

impl SubAssign<Duration> for time::OffsetDateTime {
    fn sub_assign(&mut self, rhs: Duration) {
        self.sub_assign(*rhs);
    }
}
