//! Running sums for delta coded columns.
//!
//! Every delta coded value is the sum of all deltas seen so far in its column,
//! starting from zero, so the first entry is its own absolute value.

/// Integer types a delta column can hold. Sums wrap instead of panicking on
/// hostile input.
pub trait DeltaValue: Copy + Default {
    fn wrapping_sum(self, delta: Self) -> Self;
}

macro_rules! impl_delta_value {
    ($($ty:ty),*) => {
        $(impl DeltaValue for $ty {
            #[inline]
            fn wrapping_sum(self, delta: Self) -> Self {
                self.wrapping_add(delta)
            }
        })*
    };
}

impl_delta_value!(i32, i64);

/// Running total of one column.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delta<T: DeltaValue>(T);

impl<T: DeltaValue> Delta<T> {
    /// Adds `delta` and returns the new absolute value.
    #[inline]
    pub fn apply(&mut self, delta: T) -> T {
        self.0 = self.0.wrapping_sum(delta);
        self.0
    }

    pub fn current(&self) -> T {
        self.0
    }
}

/// Decoding state of one dense node group.
///
/// Created fresh for each group and advanced strictly in row order. The key/value
/// cursor moves forward across nodes and is never reset within a group.
#[derive(Debug, Default, Clone)]
pub struct DeltaState {
    pub id: Delta<i64>,
    pub lat: Delta<i64>,
    pub lon: Delta<i64>,
    pub user_sid: Delta<i32>,
    pub uid: Delta<i32>,
    pub timestamp: Delta<i64>,
    pub changeset: Delta<i64>,
    pub kv_cursor: usize,
}

/// Turns a column of deltas into absolute values.
pub fn delta_decoded<T, I>(deltas: I) -> impl Iterator<Item = T>
where
    T: DeltaValue,
    I: IntoIterator<Item = T>,
{
    deltas.into_iter().scan(Delta::default(), |sum: &mut Delta<T>, delta| Some(sum.apply(delta)))
}
