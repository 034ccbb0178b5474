//! Walks the allocator through a fixed sequence of requests and prints the page
//! report after every step.

use pagealloc::{ArenaConfig, Handle, PageAlloc, Result};

fn log_alloc(allocator: &mut PageAlloc, size: usize) -> Result<Handle> {
    let handle = allocator.allocate(size)?;
    println!("Requested {size} bytes -> page {}, slot {}", handle.page(), handle.slot());
    Ok(handle)
}

fn main() -> Result<()> {
    let mut allocator = PageAlloc::init(ArenaConfig::default())?;

    let base = allocator.page_addr(0).expect("arena has pages");
    let last = allocator.page_count() - 1;
    println!("arena start: {:p}", base);
    println!("last page:   {:p}", allocator.page_addr(last).expect("arena has pages"));

    // Four tiny requests, all aligned to 4 bytes, share one page.
    let a1 = log_alloc(&mut allocator, 1)?;
    let a2 = log_alloc(&mut allocator, 2)?;
    let _a3 = log_alloc(&mut allocator, 3)?;
    let _a4 = log_alloc(&mut allocator, 4)?;
    println!("{}", allocator.dump());

    allocator.free(a1)?;
    allocator.free(a2)?;
    println!("{}", allocator.dump());

    let b1 = log_alloc(&mut allocator, 10)?;
    let b2 = log_alloc(&mut allocator, 20)?;
    let _b3 = log_alloc(&mut allocator, 30)?;
    let _b4 = log_alloc(&mut allocator, 30)?;
    println!("{}", allocator.dump());

    allocator.free(b1)?;
    allocator.free(b2)?;
    println!("{}", allocator.dump());

    let c1 = log_alloc(&mut allocator, 5000)?;
    let _c2 = log_alloc(&mut allocator, 13000)?;
    println!("{}", allocator.dump());

    allocator.free(c1)?;
    println!("{}", allocator.dump());

    Ok(())
}
