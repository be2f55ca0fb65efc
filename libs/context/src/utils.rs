use crate::arch;

/// Internal type for the value passed through the switch in the argument
/// register. The runtime above us has no payloads to transfer, so this only
/// ever carries zero; it exists because the register needs *a* value and the
/// assembly contract is easier to state in terms of it.
pub type EncodedValue = usize;

/// Helper function to push a value onto a stack.
#[inline]
pub unsafe fn push(sp: &mut usize, val: Option<usize>) {
    // Safety: ensured by caller
    unsafe {
        *sp -= size_of::<usize>();
        if let Some(val) = val {
            *(*sp as *mut usize) = val;
        }
    }
}

/// Helper function to allocate an object on the stack with proper alignment.
///
/// This function is written such that the stack pointer alignment can be
/// constant-folded away when the object doesn't need an alignment greater than
/// `STACK_ALIGNMENT`.
#[inline]
pub unsafe fn allocate_obj_on_stack<T>(sp: &mut usize, sp_offset: usize, obj: T) {
    // Safety: ensured by caller
    unsafe {
        // Sanity check to avoid stack overflows.
        assert!(size_of::<T>() <= 1024, "type is too big to transfer");

        if align_of::<T>() > arch::STACK_ALIGNMENT {
            *sp -= size_of::<T>();
            *sp &= !(align_of::<T>() - 1);
        } else {
            // We know that sp + sp_offset is aligned to STACK_ALIGNMENT. Calculate
            // how much padding we need to add so that sp_offset + padding +
            // sizeof(T) is aligned to STACK_ALIGNMENT.
            let total_size = sp_offset + size_of::<T>();
            let align_offset = total_size % arch::STACK_ALIGNMENT;
            if align_offset != 0 {
                *sp -= arch::STACK_ALIGNMENT - align_offset;
            }
            *sp -= size_of::<T>();
        }
        (*sp as *mut T).write(obj);

        // The stack is aligned to STACK_ALIGNMENT at this point.
        debug_assert_eq!(*sp % arch::STACK_ALIGNMENT, 0);
    }
}
