//! Control operations over the shared process tree: protection changes with
//! subtree propagation, the reaper subsystem, the trace-control state
//! machine, and the dispatcher that resolves targets and aggregates group
//! results.
#![cfg_attr(not(test), no_std)]

extern crate alloc;
#[macro_use]
extern crate log;

pub mod dispatch;
pub mod imp;
pub mod policy;
pub mod types;

#[cfg(test)]
mod testutil;

macro_rules! procctl_instrument {(
    $( #[$attr:meta] )*
    $pub:vis
    fn $fname:ident (
        $( $arg_name:ident : $ArgTy:ty ),* $(,)?
    ) -> $RetTy:ty
    $body:block
) => (
    $( #[$attr] )*
    #[allow(unused_parens)]
    $pub
    fn $fname (
        $( $arg_name : $ArgTy ),*
    ) -> $RetTy
    {
        /// The original definition, scoped so the wrapper can log its result
        fn __original_func__ (
            $($arg_name: $ArgTy),*
        ) -> $RetTy
        $body

        let res = __original_func__($($arg_name),*);
        match res {
            Ok(_) => debug!(concat!(stringify!($fname), " => {:?}"), res),
            Err(_) => info!(concat!(stringify!($fname), " => {:?}"), res),
        }
        res
    }
)}
pub(crate) use procctl_instrument;
