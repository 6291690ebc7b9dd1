//! Initial user stack: argument strings and the `argv` vector.
//!
//! Layout, from the top of the page down:
//!
//! ```text
//! argv[argc-1] .. argv[0] strings (NUL-terminated)
//! padding to an 8-byte boundary
//! NULL                      <- argv[argc]
//! &argv[argc-1] .. &argv[0]
//! fake return address       <- rsp
//! ```

use alloc::vec;
use alloc::vec::Vec;

use super::ExecError;
use crate::memory::PAGE_SIZE;

/// The finished stack page and the registers that describe it.
#[derive(Debug)]
pub struct ArgStack {
    /// Contents of the page at `top - PAGE_SIZE`.
    pub page: Vec<u8>,
    pub rsp: u64,
    pub argc: u64,
    pub argv: u64,
}

fn put_u64(page: &mut [u8], at: usize, value: u64) {
    page[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

/// Build the stack page that ends at `top`.
pub fn build(top: u64, args: &[&str]) -> Result<ArgStack, ExecError> {
    let base = top - PAGE_SIZE;
    let mut page = vec![0u8; PAGE_SIZE as usize];
    let mut sp = page.len();

    let mut pointers = Vec::with_capacity(args.len());
    for arg in args.iter().rev() {
        sp = sp
            .checked_sub(arg.len() + 1)
            .ok_or(ExecError::ArgumentsTooLong)?;
        page[sp..sp + arg.len()].copy_from_slice(arg.as_bytes());
        pointers.push(base + sp as u64);
    }
    pointers.reverse();

    sp &= !7;
    let words = args.len() + 2;
    sp = sp
        .checked_sub(words * 8)
        .ok_or(ExecError::ArgumentsTooLong)?;

    put_u64(&mut page, sp, 0);
    for (i, ptr) in pointers.iter().enumerate() {
        put_u64(&mut page, sp + 8 * (i + 1), *ptr);
    }
    put_u64(&mut page, sp + 8 * (args.len() + 1), 0);

    Ok(ArgStack {
        page,
        rsp: base + sp as u64,
        argc: args.len() as u64,
        argv: base + sp as u64 + 8,
    })
}
