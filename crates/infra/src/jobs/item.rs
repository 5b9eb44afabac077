//! Capability contracts for chunk-oriented steps.
//!
//! A chunk step pulls items from an [`ItemSource`], maps each through an
//! [`ItemTransform`] and hands surviving items to an [`ItemSink`] one batch at
//! a time. All three report failures as [`ItemFault`] values.

use std::marker::PhantomData;

use batchforge_core::ItemFault;

/// A lazy, finite sequence of items.
///
/// Each `read` yields the next item or `None` at end of stream. An item is
/// never delivered twice on the same forward pass.
pub trait ItemSource: Send {
    type Item: Send;

    fn read(&mut self) -> Result<Option<Self::Item>, ItemFault>;

    /// Return the cursor to the first item.
    ///
    /// Returns `Ok(false)` when rewinding is not supported; the next read then
    /// continues from wherever the cursor currently is.
    fn reset(&mut self) -> Result<bool, ItemFault> {
        Ok(false)
    }
}

/// Deterministic per-item mapping.
///
/// `Ok(None)` filters the item out; `Err` is a fault the skip policy may
/// absorb.
pub trait ItemTransform<T>: Send + Sync {
    type Output: Send;

    fn transform(&self, item: T) -> Result<Option<Self::Output>, ItemFault>;
}

/// Durable destination for one ordered, non-empty batch at a time.
pub trait ItemSink<U>: Send {
    fn write(&mut self, items: Vec<U>) -> Result<(), ItemFault>;
}

/// Pass-through transform; the default for chunk steps.
#[derive(Debug)]
pub struct Identity<T>(PhantomData<fn() -> T>);

impl<T> Identity<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for Identity<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> ItemTransform<T> for Identity<T> {
    type Output = T;

    fn transform(&self, item: T) -> Result<Option<T>, ItemFault> {
        Ok(Some(item))
    }
}

/// Placeholder sink type for chunk steps declared without a sink.
///
/// Never constructed; the chunk loop drops output batches when no sink is set.
#[derive(Debug)]
pub enum NoSink {}

impl<U> ItemSink<U> for NoSink {
    fn write(&mut self, _items: Vec<U>) -> Result<(), ItemFault> {
        match *self {}
    }
}

impl<S: ItemSource + ?Sized> ItemSource for Box<S> {
    type Item = S::Item;

    fn read(&mut self) -> Result<Option<Self::Item>, ItemFault> {
        (**self).read()
    }

    fn reset(&mut self) -> Result<bool, ItemFault> {
        (**self).reset()
    }
}

impl<U, W: ItemSink<U> + ?Sized> ItemSink<U> for Box<W> {
    fn write(&mut self, items: Vec<U>) -> Result<(), ItemFault> {
        (**self).write(items)
    }
}
