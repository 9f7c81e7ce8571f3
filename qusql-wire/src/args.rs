//! Binding tuples of rust values as statement parameters
use crate::param::Param;

/// A list of parameters for a prepared statement
pub trait Args<'a>: Sized {
    /// Convert the arguments into parameters in placeholder order
    fn into_params(self) -> Vec<Param<'a>>;
}

/// Implement [Args] for a tuple
macro_rules! impl_args_for_tuple {
    ($($idx:tt $T:ident),+) => {
        impl<'a, $($T,)+> Args<'a> for ($($T,)+)
        where
            $($T: Into<Param<'a>>,)+
        {
            #[inline]
            fn into_params(self) -> Vec<Param<'a>> {
                vec![$(self.$idx.into(),)+]
            }
        }
    };
}

impl<'a> Args<'a> for () {
    fn into_params(self) -> Vec<Param<'a>> {
        Vec::new()
    }
}

impl<'a> Args<'a> for Vec<Param<'a>> {
    fn into_params(self) -> Vec<Param<'a>> {
        self
    }
}

impl_args_for_tuple!(0 T1);
impl_args_for_tuple!(0 T1, 1 T2);
impl_args_for_tuple!(0 T1, 1 T2, 2 T3);
impl_args_for_tuple!(0 T1, 1 T2, 2 T3, 3 T4);
impl_args_for_tuple!(0 T1, 1 T2, 2 T3, 3 T4, 4 T5);
impl_args_for_tuple!(0 T1, 1 T2, 2 T3, 3 T4, 4 T5, 5 T6);
impl_args_for_tuple!(0 T1, 1 T2, 2 T3, 3 T4, 4 T5, 5 T6, 6 T7);
impl_args_for_tuple!(0 T1, 1 T2, 2 T3, 3 T4, 4 T5, 5 T6, 6 T7, 7 T8);
impl_args_for_tuple!(0 T1, 1 T2, 2 T3, 3 T4, 4 T5, 5 T6, 6 T7, 7 T8, 8 T9);
impl_args_for_tuple!(0 T1, 1 T2, 2 T3, 3 T4, 4 T5, 5 T6, 6 T7, 7 T8, 8 T9, 9 T10);
impl_args_for_tuple!(0 T1, 1 T2, 2 T3, 3 T4, 4 T5, 5 T6, 6 T7, 7 T8, 8 T9, 9 T10, 10 T11);
impl_args_for_tuple!(0 T1, 1 T2, 2 T3, 3 T4, 4 T5, 5 T6, 6 T7, 7 T8, 8 T9, 9 T10, 10 T11, 11 T12);
impl_args_for_tuple!(
    0 T1, 1 T2, 2 T3, 3 T4, 4 T5, 5 T6, 6 T7, 7 T8, 8 T9, 9 T10, 10 T11, 11 T12, 12 T13
);
impl_args_for_tuple!(
    0 T1, 1 T2, 2 T3, 3 T4, 4 T5, 5 T6, 6 T7, 7 T8, 8 T9, 9 T10, 10 T11, 11 T12, 12 T13, 13 T14
);
impl_args_for_tuple!(
    0 T1, 1 T2, 2 T3, 3 T4, 4 T5, 5 T6, 6 T7, 7 T8, 8 T9, 9 T10, 10 T11, 11 T12, 12 T13, 13 T14,
    14 T15
);
impl_args_for_tuple!(
    0 T1, 1 T2, 2 T3, 3 T4, 4 T5, 5 T6, 6 T7, 7 T8, 8 T9, 9 T10, 10 T11, 11 T12, 12 T13, 13 T14,
    14 T15, 15 T16
);
