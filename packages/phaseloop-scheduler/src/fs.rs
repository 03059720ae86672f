//! Whole-file reads through the worker pool.
//!
//! A read is four pool round trips: open, stat, read, close. Each step's
//! completion lands in a poll phase and submits the next one, so the final
//! callback arrives several iterations after the read was issued.

use crate::error::JobError;
use crate::scheduler::EventLoop;
use crate::task::{IntoTaskResult, TaskResult};
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

type ReadDone = Box<dyn FnOnce(&EventLoop, Result<Vec<u8>, JobError>) -> TaskResult>;

impl EventLoop {
    /// Reads the whole file at `path`; `done` runs from a poll phase.
    pub fn read_file<D, R>(&self, path: impl Into<PathBuf>, done: D)
    where
        D: FnOnce(&EventLoop, Result<Vec<u8>, JobError>) -> R + 'static,
        R: IntoTaskResult,
    {
        let done: ReadDone = Box::new(move |lp: &EventLoop, result: Result<Vec<u8>, JobError>| {
            done(lp, result).into_task_result()
        });
        open(self, path.into(), done);
    }
}

fn open(lp: &EventLoop, path: PathBuf, done: ReadDone) {
    let cost = lp.config().fs_op_cost;
    lp.submit_job(
        cost,
        move || File::open(&path).map_err(JobError::from),
        move |lp: &EventLoop, opened: Result<File, JobError>| match opened {
            Ok(file) => {
                stat(lp, file, done);
                Ok(())
            }
            Err(err) => done(lp, Err(err)),
        },
    );
}

fn stat(lp: &EventLoop, file: File, done: ReadDone) {
    let cost = lp.config().fs_op_cost;
    lp.submit_job(
        cost,
        move || -> Result<(File, u64), JobError> {
            let len = file.metadata()?.len();
            Ok((file, len))
        },
        move |lp: &EventLoop, stated: Result<(File, u64), JobError>| match stated {
            Ok((file, len)) => {
                read(lp, file, len, done);
                Ok(())
            }
            Err(err) => done(lp, Err(err)),
        },
    );
}

fn read(lp: &EventLoop, mut file: File, len: u64, done: ReadDone) {
    let cost = lp.config().fs_op_cost;
    lp.submit_job(
        cost,
        move || -> Result<(File, Vec<u8>), JobError> {
            let mut bytes = Vec::with_capacity(len as usize);
            file.read_to_end(&mut bytes)?;
            Ok((file, bytes))
        },
        move |lp: &EventLoop, read: Result<(File, Vec<u8>), JobError>| match read {
            Ok((file, bytes)) => {
                close(lp, file, bytes, done);
                Ok(())
            }
            Err(err) => done(lp, Err(err)),
        },
    );
}

fn close(lp: &EventLoop, file: File, bytes: Vec<u8>, done: ReadDone) {
    let cost = lp.config().fs_op_cost;
    lp.submit_job(
        cost,
        move || -> Result<Vec<u8>, JobError> {
            drop(file);
            Ok(bytes)
        },
        move |lp: &EventLoop, closed: Result<Vec<u8>, JobError>| done(lp, closed),
    );
}
