//! Walks through the diagnostics a tracker produces.
//!
//! Run with: cargo run --example leak_report
//!
//! Set `MEMTRACK_FATAL=abort` to see the default behavior on the double free,
//! or `NO_COLOR=1` for plain output.

use memtrack::{Category, FatalMode, Tracker, TrackerConfig};

#[inline(never)]
fn load_texture(tracker: &mut Tracker, size: usize) -> *mut u8 {
    match tracker.allocate(size, Category::Render) {
        Ok(ptr) => ptr.as_ptr(),
        Err(err) => {
            eprintln!("texture allocation failed: {}", err);
            std::ptr::null_mut()
        }
    }
}

#[inline(never)]
fn grow_buffer(tracker: &mut Tracker, ptr: *mut u8, size: usize) -> *mut u8 {
    match unsafe { tracker.reallocate(ptr, size, Category::Ds) } {
        Ok(ptr) => ptr.as_ptr(),
        Err(err) => {
            eprintln!("buffer growth failed: {}", err);
            ptr
        }
    }
}

fn main() {
    let mut config = TrackerConfig::from_env();
    if std::env::var("MEMTRACK_FATAL").is_err() {
        config.fatal_mode = FatalMode::Return;
    }
    let mut tracker = Tracker::with_config(config);

    let texture = load_texture(&mut tracker, 4096);
    let _leaked_texture = load_texture(&mut tracker, 80);

    let buffer = tracker
        .calloc(16, 8, Category::Ds)
        .map(|ptr| ptr.as_ptr())
        .unwrap_or(std::ptr::null_mut());
    let _leaked_buffer = grow_buffer(&mut tracker, buffer, 512);

    tracker.log_usage();

    unsafe {
        let _ = tracker.free(texture);
        // Second free of the same texture: reported with all three traces.
        let _ = tracker.free(texture);
    }

    let report = tracker.shutdown();
    println!("{}", report);
}
