//! Class Components
//!
//! Lifecycle-method components expressed on top of the hook cells. A class
//! instance lives in a ref cell, its state in a state cell, and the lifecycle
//! callbacks run from effects:
//!
//! | Method         | Runs                                          |
//! |----------------|-----------------------------------------------|
//! | `construct`    | once, on the first render                     |
//! | `did_mount`    | after the first commit                        |
//! | `did_update`   | after every later commit, with the old state  |
//! | `will_unmount` | while the instance is torn down               |

use std::any::type_name;

use crate::deps;
use crate::element::{ComponentElement, Element, RenderResult};
use crate::error::EffectError;
use crate::reactive::{Cleanup, Setter};
use crate::scope::Scope;

/// A component written as an object with lifecycle methods.
pub trait ClassComponent: Sized + 'static {
    type Props: 'static;
    type State: Clone + 'static;

    fn construct(props: &Self::Props) -> Self;

    fn initial_state(&self, props: &Self::Props) -> Self::State;

    fn render(&self, props: &Self::Props, state: &Self::State, this: &ClassHandle<Self>) -> RenderResult;

    fn did_mount(&mut self, _state: &Self::State) -> Result<(), EffectError> {
        Ok(())
    }

    fn did_update(&mut self, _previous: &Self::State, _state: &Self::State) -> Result<(), EffectError> {
        Ok(())
    }

    fn will_unmount(&mut self) {}
}

/// What a class render can do besides returning elements.
pub struct ClassHandle<C: ClassComponent> {
    set_state: Setter<C::State>,
}

impl<C: ClassComponent> ClassHandle<C> {
    /// Replace the state. Batched like any other state update.
    pub fn set_state(&self, state: C::State) {
        self.set_state.set(state);
    }

    /// Derive the next state from the latest queued one.
    pub fn update_state<F>(&self, f: F)
    where
        F: FnOnce(&C::State) -> C::State + 'static,
    {
        self.set_state.update(f);
    }

    /// A setter that outlives the render, for use in effects and callbacks.
    pub fn setter(&self) -> Setter<C::State> {
        self.set_state.clone()
    }
}

fn class_render<C: ClassComponent>(scope: &mut Scope<'_>, props: &C::Props) -> RenderResult {
    let this = scope.use_ref_with(|| C::construct(props));
    let (state, set_state) = scope.use_state_with(|| this.with(|c| c.initial_state(props)));
    let committed = scope.use_ref(None::<C::State>);

    {
        let this = this.clone();
        let current = state.clone();
        scope.use_effect_always(move || {
            match committed.replace(Some(current.clone())) {
                None => this.with_mut(|c| c.did_mount(&current))?,
                Some(previous) => this.with_mut(|c| c.did_update(&previous, &current))?,
            }
            Ok(None)
        });
    }
    {
        let this = this.clone();
        scope.use_effect(deps![], move || {
            Ok(Some(Cleanup::new(move || this.with_mut(|c| c.will_unmount()))))
        });
    }

    let handle = ClassHandle { set_state };
    this.with(|c| c.render(props, &state, &handle))
}

impl ComponentElement {
    /// Adapt a class component. Each class gets its own identity.
    pub fn class<C: ClassComponent>(props: C::Props) -> Self {
        Self::new(short_name::<C>(), class_render::<C>, props)
    }
}

impl Element {
    pub fn class<C: ClassComponent>(props: C::Props) -> Self {
        Self::Component(ComponentElement::class::<C>(props))
    }
}

fn short_name<C>() -> &'static str {
    let full = type_name::<C>();
    // Generic arguments may contain paths of their own.
    let path = full.split('<').next().unwrap_or(full);
    path.rsplit("::").next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ticker;

    struct Wrapper<T>(T);

    #[test]
    fn class_names_drop_the_module_path() {
        assert_eq!(short_name::<Ticker>(), "Ticker");
    }

    #[test]
    fn class_names_drop_generic_arguments() {
        assert_eq!(short_name::<Wrapper<Ticker>>(), "Wrapper");
        assert_eq!(short_name::<Wrapper<std::rc::Rc<u8>>>(), "Wrapper");
    }
}
