#![no_main]

use alloc_hater::{AllocatorOp, Evaluator};
use arbitrary::Arbitrary;
use balloc::{Balloc, Degrading};
use balloc_hater::DegradingSubject;
use libfuzzer_sys::fuzz_target;

const MAX_MIN_BLOCK_SHIFT: u8 = 8;
const MAX_LEVELS: u8 = 14;

#[derive(Clone, Debug, Arbitrary)]
struct Args {
    min_block_shift: u8,
    levels: u8,
    ops: Vec<AllocatorOp>,
}

fuzz_target!(|args: Args| {
    let min_block = 1 << (args.min_block_shift % MAX_MIN_BLOCK_SHIFT);
    let max_total = min_block << (1 + args.levels % MAX_LEVELS);

    let balloc = Balloc::<Degrading>::new(min_block, max_total);
    let mut eval = Evaluator::new(DegradingSubject::new(&balloc));

    if let Err(failed) = eval.evaluate(args.ops) {
        panic!("evaluation failed: {failed:?}");
    }
});
