// SPDX-License-Identifier: CEPL-1.0
//! Count-then-fill enumeration and fixed-size name helpers.
use ash::vk;
use std::ffi::{c_char, CStr, CString};

/// Runs a two-step enumeration entry point: ask for the count with no output
/// buffer, then fill a buffer of exactly that size. No retry: if the second
/// call reports fewer items the result is truncated to what was written.
pub(crate) fn fetch_all<T, F>(mut call: F) -> Result<Vec<T>, vk::Result>
where
    T: Default + Clone,
    F: FnMut(&mut u32, Option<&mut [T]>) -> Result<(), vk::Result>,
{
    let mut count = 0u32;
    call(&mut count, None)?;
    let mut items = vec![T::default(); count as usize];
    if count > 0 {
        call(&mut count, Some(&mut items))?;
    }
    items.truncate(count as usize);
    Ok(items)
}

/// `INCOMPLETE` only means the buffer was shorter than the full set.
pub(crate) fn check(result: vk::Result) -> Result<(), vk::Result> {
    match result {
        vk::Result::SUCCESS | vk::Result::INCOMPLETE => Ok(()),
        err => Err(err),
    }
}

/// Reads a nul-terminated name out of a fixed-size API array.
pub(crate) fn name_from_raw(raw: &[c_char]) -> Option<CString> {
    let bytes: Vec<u8> = raw
        .iter()
        .map(|&c| c as u8)
        .take_while(|&b| b != 0)
        .collect();
    CString::new(bytes).ok()
}

pub(crate) fn raw_matches(raw: &[c_char], name: &CStr) -> bool {
    raw.iter()
        .map(|&c| c as u8)
        .take_while(|&b| b != 0)
        .eq(name.to_bytes().iter().copied())
}

#[cfg(test)]
pub(crate) fn raw_from_name<const N: usize>(name: &CStr) -> [c_char; N] {
    let mut out = [0 as c_char; N];
    for (dst, &src) in out.iter_mut().take(N - 1).zip(name.to_bytes()) {
        *dst = src as c_char;
    }
    out
}
