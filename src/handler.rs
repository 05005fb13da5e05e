//! User handlers and the type-erased wrapper the executors drive.
//!
//! At planning time handlers are typed: a [`Mapper`] transforms records one
//! stream at a time, a [`Grouper`] merges several pre-sharded streams and
//! gets an [`on_shard_finish`](Grouper::on_shard_finish) call after each
//! shard drains. At execution time everything collapses to a
//! [`HandlerWrapper`]: one `dispatch(input_index, binary, raw_record)`
//! callable per bound input, each capturing its parsing codec and the typed
//! do-context.
//!
//! A wrapper (and the handler instance inside it) lives on a single worker
//! thread; factories crossing threads are the `Send + Sync` boundary.

use crate::context::{DoContext, RawContext};
use crate::output::Output;
use crate::record::{RawRecord, Record};
use crate::shard::ShardId;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

/// A map-operator handler: one input stream, one output stream.
pub trait Mapper: 'static {
    type From: Record;
    type To: Record;

    fn map(&mut self, rec: Self::From, cx: &mut DoContext<'_, Self::To>);
}

/// A group-operator handler. Input streams are bound separately via
/// [`join_input`]; this trait carries the output type and the per-shard
/// finish hook.
pub trait Grouper: 'static {
    type To: Record;

    /// Called once after every input stream of a shard has been drained.
    fn on_shard_finish(&mut self, _cx: &mut DoContext<'_, Self::To>) {}
}

pub(crate) type SinkFn = Box<dyn FnMut(bool, RawRecord, &mut RawContext)>;

type ConstantShard = Rc<RefCell<Option<ShardId>>>;

/// One bound input stream of a join: the upstream table's output name plus a
/// factory producing that stream's dispatch closure.
pub struct JoinInput<H, O: Record> {
    pub(crate) input: String,
    #[allow(clippy::type_complexity)]
    pub(crate) bind:
        Arc<dyn Fn(Rc<RefCell<H>>, Output<O>, ConstantShard) -> SinkFn + Send + Sync>,
}

/// Bind one table to one method of a grouper, eliminating the table's record
/// type: the returned [`JoinInput`] only carries the grouper and output
/// types, so heterogeneous inputs can share a `Vec`.
pub fn join_input<T, H, O>(
    table: &crate::table::PTable<T>,
    method: impl Fn(&mut H, T, &mut DoContext<'_, O>) + Send + Sync + 'static,
) -> JoinInput<H, O>
where
    T: Record,
    H: 'static,
    O: Record,
{
    let method = Arc::new(method);
    JoinInput {
        input: table.dependee_input(),
        bind: Arc::new(move |handler, out, constant| {
            let method = Arc::clone(&method);
            Box::new(move |binary, raw, cx| match T::parse(binary, raw) {
                Some(rec) => {
                    let constant = constant.borrow();
                    let mut dcx = DoContext::new(&out, constant.as_ref(), cx);
                    method(&mut handler.borrow_mut(), rec, &mut dcx);
                }
                None => cx.emit_parse_error(),
            })
        }),
    }
}

/// The uniform execution-time face of a handler.
pub struct HandlerWrapper {
    sinks: Vec<SinkFn>,
    finish: Option<Box<dyn FnMut(&mut RawContext)>>,
    constant_shard: ConstantShard,
}

impl HandlerWrapper {
    /// Number of bound input streams.
    pub fn num_inputs(&self) -> usize {
        self.sinks.len()
    }

    /// Parse a raw record with input `index`'s codec and hand it to the
    /// handler. A record that fails to parse is counted and dropped without
    /// reaching the handler.
    pub fn dispatch(&mut self, index: usize, binary: bool, raw: RawRecord, cx: &mut RawContext) {
        (self.sinks[index])(binary, raw, cx);
    }

    /// Pin every emission from this wrapper to `sid`; the joiner sets the
    /// shard it is draining so grouper output lands in the matching shard.
    pub fn set_output_shard(&mut self, sid: ShardId) {
        *self.constant_shard.borrow_mut() = Some(sid);
    }

    /// Invoke the grouper's finish hook, if any.
    pub fn on_shard_finish(&mut self, cx: &mut RawContext) {
        if let Some(f) = &mut self.finish {
            f(cx);
        }
    }
}

/// Wrapper for the identity handler of read tables: parse as `T`, re-emit.
pub(crate) fn identity_wrapper<T: Record>(out: Output<T>) -> HandlerWrapper {
    let constant_shard: ConstantShard = Rc::new(RefCell::new(None));
    let cs = Rc::clone(&constant_shard);
    let sink: SinkFn = Box::new(move |binary, raw, cx| match T::parse(binary, raw) {
        Some(rec) => {
            let constant = cs.borrow();
            let mut dcx = DoContext::new(&out, constant.as_ref(), cx);
            dcx.write(rec);
        }
        None => cx.emit_parse_error(),
    });
    HandlerWrapper {
        sinks: vec![sink],
        finish: None,
        constant_shard,
    }
}

/// Wrapper around a fresh [`Mapper`] instance.
pub(crate) fn mapper_wrapper<M: Mapper>(mut handler: M, out: Output<M::To>) -> HandlerWrapper {
    let constant_shard: ConstantShard = Rc::new(RefCell::new(None));
    let cs = Rc::clone(&constant_shard);
    let sink: SinkFn = Box::new(move |binary, raw, cx| match M::From::parse(binary, raw) {
        Some(rec) => {
            let constant = cs.borrow();
            let mut dcx = DoContext::new(&out, constant.as_ref(), cx);
            handler.map(rec, &mut dcx);
        }
        None => cx.emit_parse_error(),
    });
    HandlerWrapper {
        sinks: vec![sink],
        finish: None,
        constant_shard,
    }
}

/// Wrapper around a fresh [`Grouper`] instance with its per-input bindings.
#[allow(clippy::type_complexity)]
pub(crate) fn grouper_wrapper<H: Grouper>(
    handler: H,
    out: Output<H::To>,
    binds: &[Arc<dyn Fn(Rc<RefCell<H>>, Output<H::To>, ConstantShard) -> SinkFn + Send + Sync>],
) -> HandlerWrapper {
    let constant_shard: ConstantShard = Rc::new(RefCell::new(None));
    let handler = Rc::new(RefCell::new(handler));
    let sinks = binds
        .iter()
        .map(|bind| {
            bind(
                Rc::clone(&handler),
                out.clone(),
                Rc::clone(&constant_shard),
            )
        })
        .collect();

    let cs = Rc::clone(&constant_shard);
    let finish: Box<dyn FnMut(&mut RawContext)> = Box::new(move |cx| {
        let constant = cs.borrow();
        let mut dcx = DoContext::new(&out, constant.as_ref(), cx);
        handler.borrow_mut().on_shard_finish(&mut dcx);
    });

    HandlerWrapper {
        sinks,
        finish: Some(finish),
        constant_shard,
    }
}
