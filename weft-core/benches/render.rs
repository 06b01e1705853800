//! Render throughput: mounting a list and flushing batched updates.

use std::cell::RefCell;
use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use weft_core::{
    deps, ComponentElement, Element, InstanceId, Output, RenderResult, Runtime, Scope, Setter,
};

type Exposed = Rc<RefCell<Option<Setter<u32>>>>;

#[derive(Clone)]
struct ListProps {
    len: usize,
    setter: Exposed,
}

fn row(scope: &mut Scope<'_>, index: &usize) -> RenderResult {
    let label = scope.use_memo(deps![*index as u64], || format!("row {index}"));
    Ok(Element::node("li").child(Element::text(label.as_str())).into())
}

fn list(scope: &mut Scope<'_>, props: &ListProps) -> RenderResult {
    let (tick, set_tick) = scope.use_state(0_u32);
    *props.setter.borrow_mut() = Some(set_tick);

    let rows = (0..props.len).map(|i| Element::memo("Row", row, i).with_key(i.to_string()));
    Ok(Element::node("ul")
        .attr("data-tick", tick.to_string())
        .children(rows.collect::<Vec<_>>())
        .into())
}

fn discard(_: InstanceId, output: &Output) {
    black_box(output);
}

fn bench_mount(c: &mut Criterion) {
    let mut group = c.benchmark_group("mount");
    for len in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, &len| {
            b.iter(|| {
                let runtime = Runtime::default();
                let props = ListProps {
                    len,
                    setter: Exposed::default(),
                };
                let root = runtime
                    .mount(ComponentElement::new("List", list, props), discard)
                    .unwrap();
                runtime.unmount(root).unwrap();
            })
        });
    }
    group.finish();
}

fn bench_batched_update(c: &mut Criterion) {
    let runtime = Runtime::default();
    let setter = Exposed::default();
    runtime
        .mount(
            ComponentElement::new(
                "List",
                list,
                ListProps {
                    len: 100,
                    setter: setter.clone(),
                },
            ),
            discard,
        )
        .unwrap();
    let set = setter.borrow().clone().unwrap();

    c.bench_function("batched_update_100_rows", |b| {
        b.iter(|| {
            for _ in 0..10 {
                set.update(|n| n.wrapping_add(1));
            }
            runtime.flush().unwrap();
        })
    });
}

criterion_group!(benches, bench_mount, bench_batched_update);
criterion_main!(benches);
