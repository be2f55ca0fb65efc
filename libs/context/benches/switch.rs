use context::{ExecutionContext, HostStack, Resume};
use criterion::{Criterion, criterion_group, criterion_main};

fn switch(c: &mut Criterion) {
    let stack = HostStack::new(64 * 1024).unwrap();
    let mut ctx = ExecutionContext::new(stack, |switcher| {
        loop {
            switcher.switch_out();
        }
    });

    c.bench_function("resume + switch_out", |b| {
        b.iter(|| {
            assert_eq!(ctx.resume(), Resume::Suspended);
        });
    });

    // The context loops forever; it can never be dropped cleanly.
    std::mem::forget(ctx);
}

criterion_group!(benches, switch);
criterion_main!(benches);
