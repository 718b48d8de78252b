use std::{env, io::Read};

use fitalloc::{Config, Heap, HeapGrower, Strategy};
use libc::sbrk;

/// Waits until the user presses ENTER, so the heap can be inspected with
/// `pmap` or `gdb` between steps. Pass `--no-wait` to run straight through.
fn block_until_enter_pressed(wait: bool) {
  if !wait {
    return;
  }
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { sbrk(0) },
  );
}

fn print_blocks<G: HeapGrower>(heap: &Heap<G>) {
  for block in heap.blocks() {
    println!(
      "    {:p}  size={:<6} {}",
      block.payload,
      block.size,
      if block.is_free { "free" } else { "used" }
    );
  }
  let stats = heap.stats();
  println!(
    "    live={} free={} metadata={} extended={}",
    stats.live, stats.free, stats.metadata, stats.extended
  );
}

fn main() {
  env_logger::init();
  fitalloc::enable_logging();

  let wait = !env::args().any(|arg| arg == "--no-wait");
  // FITALLOC_STRATEGY overrides the default of first-fit.
  let config = match env::var(fitalloc::config::STRATEGY_ENV) {
    Ok(_) => Config::from_env().unwrap_or_else(|err| {
      eprintln!("invalid configuration: {err}");
      std::process::exit(2);
    }),
    Err(_) => Config::new(Strategy::FirstFit),
  };
  let mut heap = Heap::new(config);
  println!("Using {} placement", config.strategy());

  print_program_break("start");
  block_until_enter_pressed(wait);

  // 1) A u32 and a 12-byte buffer: each request becomes its own block.
  let first = heap.allocate(4);
  let second = heap.allocate(12);
  println!("\n[1] Allocated 4 bytes at {:p} and 12 bytes at {:p}", first, second);
  unsafe {
    first.cast::<u32>().write(0xDEADBEEF);
    second.write_bytes(0xAB, 12);
    println!("[1] Value written to first = 0x{:X}", first.cast::<u32>().read());
  }
  print_blocks(&heap);
  block_until_enter_pressed(wait);

  // 2) A bigger block that gets released again.
  let big = heap.allocate(256);
  let guard = heap.allocate(8);
  unsafe { heap.release(big) };
  println!("\n[2] Allocated and released 256 bytes at {:p}", big);
  print_blocks(&heap);
  block_until_enter_pressed(wait);

  // 3) A small request reuses the freed block; the fit strategies split it.
  let small = heap.allocate(32);
  println!(
    "\n[3] Allocated 32 bytes at {:p}: {}",
    small,
    if small == big {
      "reused the freed block"
    } else {
      "placed somewhere else"
    }
  );
  print_blocks(&heap);
  block_until_enter_pressed(wait);

  // 4) Releasing the neighbours lets the free blocks merge back together.
  unsafe {
    heap.release(small);
    heap.release(guard);
  }
  println!("\n[4] Released the 32-byte block and its neighbour");
  print_blocks(&heap);
  block_until_enter_pressed(wait);

  // 5) Resize keeps the contents.
  let moved = unsafe { heap.resize(second, 48) };
  println!("\n[5] Resized 12 -> 48 bytes, now at {:p}", moved);
  println!("[5] First byte still 0x{:X}", unsafe { *moved });
  print_blocks(&heap);
  block_until_enter_pressed(wait);

  // 6) A large block moves the program break.
  print_program_break("before large alloc");
  let large = heap.allocate(64 * 1024);
  println!("\n[6] Allocated 64 KiB at {:p}", large);
  print_program_break("after large alloc");
  heap.print_state();
  block_until_enter_pressed(wait);

  // The heap never hands memory back; the OS reclaims it on exit.
  println!("\n[7] End of example. Process will exit and the OS will reclaim all memory.");
}
