use std::io::Read;

use seglist_alloc::{get_errno, mm_deinit, mm_free, mm_init, mm_malloc};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`, `htop`,
/// or `gdb` between steps.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints a pointer and the current errno slot, the way every step below
/// reports what `mm_malloc`/`mm_free` just did.
fn report(label: &str, ptr: *mut u8) {
  println!("[{label}] ptr = {ptr:?}, errno = {}", get_errno());
}

fn main() {
  env_logger::init();

  unsafe {
    // --------------------------------------------------------------------
    // 0) Map a one-megabyte arena and install the free-list bookkeeping.
    // --------------------------------------------------------------------
    let rc = mm_init(1 << 20);
    println!("[0] mm_init(1 MiB) -> {rc}, errno = {}", get_errno());
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 1) Allocate space for a u32.
    // --------------------------------------------------------------------
    let first_block = mm_malloc(4) as *mut u32;
    println!("\n[1] Allocate 4 bytes (u32)");
    report("1", first_block as *mut u8);

    first_block.write(0xDEADBEEF);
    println!("[1] Value written to first_block = 0x{:X}", first_block.read());

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Allocate 12 bytes (u8[12]).
    //    Shows how the allocator rounds odd-sized requests up to a legal
    //    double-word-aligned block.
    // --------------------------------------------------------------------
    let second_block = mm_malloc(12);
    println!("\n[2] Allocate 12 bytes");
    report("2", second_block);
    std::ptr::write_bytes(second_block, 0xAB, 12);
    println!("[2] Initialized second block with 0xAB");

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Allocate a u64 to confirm alignment.
    // --------------------------------------------------------------------
    let third_block = mm_malloc(8) as *mut u64;
    println!("\n[3] Allocate 8 bytes (u64)");
    report("3", third_block as *mut u8);
    third_block.write(0x1122334455667788);
    println!(
      "[3] Value written = 0x{:X}, addr % 16 = {}",
      third_block.read(),
      (third_block as usize) % 16
    );

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) Allocate an array of u16 to force more allocator bookkeeping.
    // --------------------------------------------------------------------
    let fourth_block = mm_malloc(32) as *mut u16;
    println!("\n[4] Allocate 32 bytes ([u16; 16])");
    report("4", fourth_block as *mut u8);
    for i in 0..16u16 {
      fourth_block.add(i as usize).write(i);
    }
    println!("[4] Wrote 0..15 into the u16 array");

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) Free the first block. Its neighbors are still allocated, so it
    //    simply becomes a standalone free block (no coalescing yet).
    // --------------------------------------------------------------------
    mm_free(first_block as *mut u8);
    println!("\n[5] Freed first_block at {first_block:?}");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 6) Allocate a small block and see whether first-fit reuses the
    //    freed block from step 5.
    // --------------------------------------------------------------------
    let fifth_block = mm_malloc(2);
    println!("\n[6] Allocate 2 bytes (check reuse of freed block)");
    report("6", fifth_block);
    println!(
      "[6] fifth_block == first_block? {}",
      if fifth_block == first_block as *mut u8 { "yes, it reused the freed block" } else { "no, it placed it elsewhere" }
    );

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 7) Free the second and fourth blocks too, then free the fifth block
    //    (which sits where first_block used to be): with both physical
    //    neighbors free, this should coalesce into one larger run.
    // --------------------------------------------------------------------
    mm_free(second_block);
    mm_free(fourth_block as *mut u8);
    mm_free(fifth_block);
    println!("\n[7] Freed second, fourth and fifth blocks; adjacent free runs should have merged");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 8) Allocate a large block to exercise extend_heap against the
    //    reserved-but-not-yet-carved part of the arena.
    // --------------------------------------------------------------------
    let big_block = mm_malloc(64 * 1024);
    println!("\n[8] Allocate 64 KiB block");
    report("8", big_block);

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 9) Tear down. Every pointer handed out above is invalid after this.
    // --------------------------------------------------------------------
    let rc = mm_deinit();
    println!("\n[9] mm_deinit() -> {rc}. End of example.");
  }
}
