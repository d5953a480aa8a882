//! File Scopes Example
//!
//! Demonstrates synchronous disposal stacks with real temporary files.
//!
//! Shows practical patterns including:
//! - Scoped cleanup of several files, most recent first
//! - Body errors taking precedence over cleanup errors
//! - Building a stack from a batch, with rollback on failure
//! - Per-item scoping while walking a list of files
//!
//! Run with: cargo run --example file_scopes

use std::fs::{self, File};
use std::io::{self, Write as IoWrite};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use disposable::{BoxError, Candidate, DisposableStack, Dispose, ScopeError};

/// A temporary file removed on disposal.
struct TempFile {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl TempFile {
    fn create(dir: &Path, name: &str) -> io::Result<Self> {
        let path = dir.join(name);
        let file = File::create(&path)?;
        println!("  created {}", path.display());
        Ok(TempFile {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    fn write_line(&self, line: &str) -> io::Result<()> {
        let mut guard = self.file.lock().map_err(|_| io::Error::other("poisoned"))?;
        match guard.as_mut() {
            Some(file) => writeln!(file, "{}", line),
            None => Err(io::Error::other("file already closed")),
        }
    }
}

impl Dispose for TempFile {
    fn dispose(&self) -> Result<(), BoxError> {
        if let Ok(mut guard) = self.file.lock() {
            guard.take();
        }
        fs::remove_file(&self.path)?;
        println!("  removed {}", self.path.display());
        Ok(())
    }
}

// ==================== Scoped Cleanup ====================

fn example_scope(dir: &Path) {
    println!("\n=== Example 1: Scoped Cleanup ===");

    let result: Result<usize, ScopeError<BoxError>> = DisposableStack::scope(|adder| {
        let input = adder.use_resource(TempFile::create(dir, "input.txt")?)?;
        let output = adder.use_resource(TempFile::create(dir, "output.txt")?)?;
        input.write_line("hello")?;
        output.write_line("HELLO")?;
        Ok(2)
    });

    println!("  Result: {:?}", result.map_err(|e| e.to_string()));
}

// ==================== Body Error Precedence ====================

fn example_body_error(dir: &Path) {
    println!("\n=== Example 2: Body Error Wins ===");

    let result: Result<(), ScopeError<BoxError>> = DisposableStack::scope(|adder| {
        let file = adder.use_resource(TempFile::create(dir, "report.txt")?)?;
        // removing the file early makes its cleanup fail too
        fs::remove_file(&file.path)?;
        Err("report generation failed".into())
    });

    if let Err(err) = result {
        println!("  Body error: {:?}", err.body_error().map(|e| e.to_string()));
        println!(
            "  Suppressed cleanup error: {:?}",
            err.suppressed().map(|e| e.to_string())
        );
    }
}

// ==================== Batch Construction ====================

fn example_batch(dir: &Path) {
    println!("\n=== Example 3: Batch With Rollback ===");

    let names = ["a.log", "b.log", "missing/c.log"];
    let result = DisposableStack::try_from_resources(
        names.iter().map(|name| TempFile::create(dir, name)),
        |file| Candidate::dispose(Arc::new(file)),
    );

    match result {
        Ok(stack) => println!("  Tracked {} files", stack.len()),
        Err(err) => println!("  Rolled back: {}", err),
    }
}

// ==================== Per-Item Scoping ====================

fn example_using_from(dir: &Path) {
    println!("\n=== Example 4: One File At A Time ===");

    let files: Vec<_> = (0..3)
        .filter_map(|i| TempFile::create(dir, &format!("chunk-{}.bin", i)).ok())
        .map(Arc::new)
        .collect();

    for file in DisposableStack::using_from(files, |f: &Arc<TempFile>| Candidate::dispose(f.clone())) {
        match file {
            Ok(file) => println!("  processing {}", file.path.display()),
            Err(err) => println!("  cleanup failed: {}", err),
        }
    }
}

fn main() -> io::Result<()> {
    println!("Disposable File Scopes");
    println!("======================");

    let dir = std::env::temp_dir().join(format!("disposable-demo-{}", std::process::id()));
    fs::create_dir_all(&dir)?;

    example_scope(&dir);
    example_body_error(&dir);
    example_batch(&dir);
    example_using_from(&dir);

    fs::remove_dir_all(&dir)?;
    println!("\nDone.");
    Ok(())
}
