//! Reading a response body while reporting progress.
//!
//! Before any byte arrives a first notification is sent claiming roughly a third of the work is done, since from the
//! caller's point of view connection setup is a large share of the wait.  With a known length the remaining progress
//! is scaled into the upper half: after `n` of `total` bytes the report is `(total + n) / 2`, reaching `total`
//! exactly at the end.  With an unknown length there's nothing to scale against, so a single `(n, n)` is sent once
//! the stream ends.
use std::io::{ErrorKind, Read};
use std::time::Instant;

use crate::*;

const CHUNK_SIZE: usize = 16 * 1024;

/// Largest up-front allocation made on the strength of a declared length; bigger bodies grow as they arrive.
const MAX_PREALLOCATION: u64 = 8 * 1024 * 1024;

fn check_interrupts(deadline: Option<Instant>, cancel: &CancelToken) -> Result<(), LoadError> {
    cancel.check()?;
    if let Some(d) = deadline {
        if Instant::now() >= d {
            return Err(TransferError::TimedOut.into());
        }
    }
    Ok(())
}

/// `(a + b) / 2` without overflowing, since declared lengths come from the other end of a connection.
fn midpoint(a: u64, b: u64) -> u64 {
    a / 2 + b / 2 + (a % 2 + b % 2) / 2
}

/// Read `reader` to the end, or to `declared_length` if given, calling `progress(total, loaded)` along the way.
pub(crate) fn read_progressively<R: Read>(
    mut reader: R,
    declared_length: Option<u64>,
    deadline: Option<Instant>,
    cancel: &CancelToken,
    mut progress: impl FnMut(u64, u64),
) -> Result<Vec<u8>, LoadError> {
    match declared_length {
        Some(0) => {
            progress(0, 0);
            Ok(vec![])
        }
        Some(total) => {
            progress(total, total / 3);

            let mut dest = Vec::with_capacity(total.min(MAX_PREALLOCATION) as usize);
            let mut chunk = vec![0u8; CHUNK_SIZE];
            let mut received = 0u64;
            while received < total {
                check_interrupts(deadline, cancel)?;
                let want = (total - received).min(CHUNK_SIZE as u64) as usize;
                let got = match reader.read(&mut chunk[..want]) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(TransferError::Io(e).into()),
                };
                dest.extend_from_slice(&chunk[..got]);
                received += got as u64;
                progress(total, midpoint(total, received));
            }

            if received < total {
                return Err(TransferError::Truncated {
                    expected: total,
                    received,
                }
                .into());
            }
            Ok(dest)
        }
        None => {
            progress(3, 1);

            let mut dest = vec![];
            let mut chunk = vec![0u8; CHUNK_SIZE];
            loop {
                check_interrupts(deadline, cancel)?;
                match reader.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => dest.extend_from_slice(&chunk[..n]),
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(TransferError::Io(e).into()),
                }
            }

            let n = dest.len() as u64;
            progress(n, n);
            Ok(dest)
        }
    }
}
