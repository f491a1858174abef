//! Manual smoke test for both allocators, mirroring the scenarios walked through in their
//! module documentation. Not part of the library's public contract.

use dualloc::{FixedBuddyAllocator, FreeListAllocator};

fn run_bmalloc_demo() {
    println!("-- bmalloc --");
    let mut buf = [0u8; 16 * 32];
    let mut fba = FixedBuddyAllocator::<16>::new(&mut buf);

    let a = fba.allocate(88).unwrap();
    let b = fba.allocate(124).unwrap();
    let c = fba.allocate(56).unwrap();
    let d = fba.allocate(104).unwrap();
    println!("allocated a={a:p} b={b:p} c={c:p} d={d:p}");

    fba.free(a, 88);
    let e = fba.allocate(8).unwrap();
    println!("freed a, allocated e={e:p}");

    fba.free(b, 124);
    fba.free(c, 56);
    fba.free(d, 104);
    fba.free(e, 8);
}

fn run_vmalloc_demo() {
    println!("-- vmalloc --");
    let mut fla = FreeListAllocator::create(1 << 20).expect("reservation should succeed");

    let a = fla.allocate(128).unwrap();
    let b = fla.allocate(256).unwrap();
    let c = fla.allocate(64).unwrap();
    println!("{fla}");

    fla.free(a);
    fla.free(c);
    println!("{fla}");

    fla.free(b);
    println!("{fla}");
}

fn main() {
    env_logger::init();
    run_bmalloc_demo();
    run_vmalloc_demo();
}
