//! Ready-made sources, transforms and sinks.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;

use batchforge_core::ItemFault;

use super::item::{ItemSink, ItemSource, ItemTransform};

/// Reads items from an owned list. Resettable.
#[derive(Debug, Clone)]
pub struct VecSource<T> {
    items: Vec<T>,
    index: usize,
}

impl<T> VecSource<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items, index: 0 }
    }
}

impl<T: Clone + Send> ItemSource for VecSource<T> {
    type Item = T;

    fn read(&mut self) -> Result<Option<T>, ItemFault> {
        let item = self.items.get(self.index).cloned();
        if item.is_some() {
            self.index += 1;
        }
        Ok(item)
    }

    fn reset(&mut self) -> Result<bool, ItemFault> {
        self.index = 0;
        Ok(true)
    }
}

/// Reads from an iterator produced by a factory; `reset` calls the factory
/// again.
pub struct IterSource<F, I> {
    factory: F,
    iter: I,
}

impl<F, I> IterSource<F, I>
where
    F: Fn() -> I,
    I: Iterator,
{
    pub fn new(factory: F) -> Self {
        let iter = factory();
        Self { factory, iter }
    }
}

impl<F, I> ItemSource for IterSource<F, I>
where
    F: Fn() -> I + Send,
    I: Iterator + Send,
    I::Item: Send,
{
    type Item = I::Item;

    fn read(&mut self) -> Result<Option<I::Item>, ItemFault> {
        Ok(self.iter.next())
    }

    fn reset(&mut self) -> Result<bool, ItemFault> {
        self.iter = (self.factory)();
        Ok(true)
    }
}

/// Reads one JSON document per line from a file. Resettable (reopens).
///
/// Blank lines are ignored; a malformed line is a `parse` fault.
pub struct JsonLinesSource<T> {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    line_no: usize,
    _item: PhantomData<fn() -> T>,
}

impl<T> JsonLinesSource<T> {
    /// The file is opened lazily on first read.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            reader: None,
            line_no: 0,
            _item: PhantomData,
        }
    }

    fn open(&self) -> Result<BufReader<File>, ItemFault> {
        File::open(&self.path).map(BufReader::new).map_err(|e| {
            ItemFault::other(format!("failed to open {}: {e}", self.path.display()))
        })
    }
}

impl<T: DeserializeOwned + Send> ItemSource for JsonLinesSource<T> {
    type Item = T;

    fn read(&mut self) -> Result<Option<T>, ItemFault> {
        if self.reader.is_none() {
            self.reader = Some(self.open()?);
        }
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        let mut line = String::new();
        loop {
            line.clear();
            let read = reader.read_line(&mut line).map_err(|e| {
                ItemFault::other(format!("failed to read {}: {e}", self.path.display()))
            })?;
            if read == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            return serde_json::from_str(line.trim())
                .map(Some)
                .map_err(|e| ItemFault::parse(format!("line {}: {e}", self.line_no)));
        }
    }

    fn reset(&mut self) -> Result<bool, ItemFault> {
        self.reader = Some(self.open()?);
        self.line_no = 0;
        Ok(true)
    }
}

/// Transform backed by a closure.
pub struct FnTransform<F, T> {
    func: F,
    _input: PhantomData<fn(T)>,
}

impl<F, T, U> FnTransform<F, T>
where
    F: Fn(T) -> Result<Option<U>, ItemFault>,
{
    pub fn new(func: F) -> Self {
        Self {
            func,
            _input: PhantomData,
        }
    }
}

impl<F, T, U> ItemTransform<T> for FnTransform<F, T>
where
    F: Fn(T) -> Result<Option<U>, ItemFault> + Send + Sync,
    U: Send,
{
    type Output = U;

    fn transform(&self, item: T) -> Result<Option<U>, ItemFault> {
        (self.func)(item)
    }
}

/// Appends every written batch to a shared buffer (tests/dev).
#[derive(Debug)]
pub struct CollectingSink<U> {
    target: Arc<Mutex<Vec<U>>>,
}

impl<U> CollectingSink<U> {
    /// Returns the sink plus a handle to the buffer it fills.
    pub fn new() -> (Self, Arc<Mutex<Vec<U>>>) {
        let target = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                target: target.clone(),
            },
            target,
        )
    }

    pub fn into_buffer(target: Arc<Mutex<Vec<U>>>) -> Self {
        Self { target }
    }
}

impl<U: Send> ItemSink<U> for CollectingSink<U> {
    fn write(&mut self, items: Vec<U>) -> Result<(), ItemFault> {
        self.target
            .lock()
            .map_err(|_| ItemFault::other("collecting sink lock poisoned"))?
            .extend(items);
        Ok(())
    }
}

/// Sink backed by a closure.
pub struct FnSink<F> {
    func: F,
}

impl<F> FnSink<F> {
    pub fn new<U>(func: F) -> Self
    where
        F: FnMut(Vec<U>) -> Result<(), ItemFault>,
    {
        Self { func }
    }
}

impl<F, U> ItemSink<U> for FnSink<F>
where
    F: FnMut(Vec<U>) -> Result<(), ItemFault> + Send,
{
    fn write(&mut self, items: Vec<U>) -> Result<(), ItemFault> {
        (self.func)(items)
    }
}

/// Appends one JSON document per item to a file, flushing after each batch.
pub struct JsonLinesSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl JsonLinesSink {
    /// The file is created (or appended to) lazily on first write.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: None,
        }
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>, ItemFault> {
        if self.writer.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(|e| {
                    ItemFault::other(format!("failed to open {}: {e}", self.path.display()))
                })?;
            self.writer = Some(BufWriter::new(file));
        }
        self.writer
            .as_mut()
            .ok_or_else(|| ItemFault::other("json lines writer unavailable"))
    }
}

impl<U: Serialize> ItemSink<U> for JsonLinesSink {
    fn write(&mut self, items: Vec<U>) -> Result<(), ItemFault> {
        let path = self.path.display().to_string();
        let writer = self.writer()?;
        for item in &items {
            serde_json::to_writer(&mut *writer, item)
                .map_err(|e| ItemFault::other(format!("failed to encode item: {e}")))?;
            writer
                .write_all(b"\n")
                .map_err(|e| ItemFault::other(format!("failed to write {path}: {e}")))?;
        }
        writer
            .flush()
            .map_err(|e| ItemFault::other(format!("failed to flush {path}: {e}")))
    }
}
