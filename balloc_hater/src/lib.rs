use alloc_hater::Subject;
use balloc::{AllocError, Allocation, Balloc, Degrading, ExhaustionPolicy, Strict};

/// Returns the number of region bytes reserved by `allocation`.
fn footprint(min_block: usize, allocation: &Allocation<'_>) -> usize {
    if !allocation.is_pool_backed() {
        return 0;
    }

    allocation.len().next_power_of_two().max(min_block)
}

/// Returns `true` if `reserved` bytes held by outstanding allocations and the
/// free bytes of `balloc` add up to the whole region.
fn conserved<P: ExhaustionPolicy>(balloc: &Balloc<P>, reserved: usize) -> bool {
    balloc.avail() + reserved == balloc.max_total()
}

pub struct StrictSubject<'a>(&'a Balloc<Strict>);

impl<'a> StrictSubject<'a> {
    pub fn new(balloc: &'a Balloc<Strict>) -> Self {
        StrictSubject(balloc)
    }
}

impl<'a> Subject for StrictSubject<'a> {
    type Allocation = Allocation<'a>;
    type AllocError = AllocError;

    fn allocate(&mut self, size: usize) -> Result<Allocation<'a>, AllocError> {
        self.0.alloc(size)
    }

    fn deallocate(&mut self, allocation: Allocation<'a>) {
        self.0.free(allocation);
    }

    fn check<'b, I>(&self, outstanding: I) -> bool
    where
        I: IntoIterator<Item = &'b Self::Allocation>,
        Self::Allocation: 'b,
    {
        let reserved = outstanding
            .into_iter()
            .map(|a| footprint(self.0.min_block(), a))
            .sum();

        conserved(self.0, reserved)
    }
}

pub struct DegradingSubject<'a>(&'a Balloc<Degrading>);

impl<'a> DegradingSubject<'a> {
    pub fn new(balloc: &'a Balloc<Degrading>) -> Self {
        DegradingSubject(balloc)
    }
}

impl<'a> Subject for DegradingSubject<'a> {
    type Allocation = Allocation<'a>;
    type AllocError = std::convert::Infallible;

    fn allocate(&mut self, size: usize) -> Result<Allocation<'a>, Self::AllocError> {
        Ok(self.0.alloc(size))
    }

    fn deallocate(&mut self, allocation: Allocation<'a>) {
        self.0.free(allocation);
    }

    fn check<'b, I>(&self, outstanding: I) -> bool
    where
        I: IntoIterator<Item = &'b Self::Allocation>,
        Self::Allocation: 'b,
    {
        let reserved = outstanding
            .into_iter()
            .map(|a| footprint(self.0.min_block(), a))
            .sum();

        conserved(self.0, reserved)
    }
}
