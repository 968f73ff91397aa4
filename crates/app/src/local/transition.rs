//! Fades numeric state toward its target over time.
//!
//! The engine owns the *committed* targets of running transitions; the
//! thing's live values move toward them in ticks scheduled on the thing's
//! executor. At most one transition runs per property, and a newer one
//! supersedes it. Reads of the live value never see an unclamped target.
//!
//! The level property follows on/off:
//! - turning on fades the level up from zero
//! - turning off fades it down to zero, then switches off and restores the
//!   committed level
//! - while off, level changes apply immediately

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};

use thingmesh_domain::catalog::{level, onoff};
use thingmesh_domain::time::{duration_from_secs, secs_remaining};
use thingmesh_domain::value::{Value, ValueMap};

use crate::local::LocalThing;
use crate::thing::Thing;

/// Interval between two interpolation steps.
pub const TICK_INTERVAL: Duration = Duration::from_millis(20);

struct Active {
    generation: u64,
    deadline: Instant,
    /// Values committed when the transition completes.
    finals: ValueMap,
    abort: Option<AbortHandle>,
}

/// Linear fade of one property.
struct Fade {
    from: f64,
    to: f64,
    started: Instant,
    span: Duration,
}

impl Fade {
    fn value_at(&self, now: Instant) -> Option<f64> {
        let elapsed = now.saturating_duration_since(self.started);
        if elapsed >= self.span {
            return None;
        }
        let progress = elapsed.as_secs_f64() / self.span.as_secs_f64();
        Some(self.from + (self.to - self.from) * progress)
    }
}

#[derive(Default)]
pub(crate) struct TransitionEngine {
    active: Mutex<HashMap<String, Active>>,
    generation: AtomicU64,
}

impl TransitionEngine {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Active>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Committed target of `key` while a transition involving it runs.
    pub(crate) fn target(&self, key: &str) -> Option<Value> {
        self.lock()
            .values()
            .find_map(|active| active.finals.get(key).cloned())
    }

    /// Seconds until every running transition has settled.
    pub(crate) fn remaining_secs(&self) -> f64 {
        let now = Instant::now();
        self.lock()
            .values()
            .map(|active| secs_remaining(active.deadline, now))
            .fold(0.0, f64::max)
    }

    pub(crate) fn cancel_all(&self) {
        for (_, active) in self.lock().drain() {
            if let Some(abort) = active.abort {
                abort.abort();
            }
        }
    }

    fn supersede(&self, key: &str) {
        if let Some(active) = self.lock().remove(key)
            && let Some(abort) = active.abort
        {
            abort.abort();
        }
    }

    /// Apply validated `changes`, fading the level where it applies.
    pub(crate) fn start(&self, this: &Thing, local: &LocalThing, mut changes: ValueMap, duration: Option<f64>) {
        let on_key = onoff::STAT_VALUE.name();
        let level_key = level::STAT_VALUE.name();
        let touches_level = changes.contains_key(on_key) || changes.contains_key(level_key);
        if local.descriptor(level_key).is_none() || !touches_level {
            local.commit(this, changes);
            return;
        }

        let has_onoff = local.descriptor(on_key).is_some();
        let as_bool = |value: Option<Value>| value.and_then(|value| value.as_bool());
        let as_f64 = |value: Option<Value>| value.and_then(|value| value.as_f64());
        let committed_on = !has_onoff || as_bool(local.committed_value(on_key)).unwrap_or(false);
        let target_on = as_bool(changes.remove(on_key)).unwrap_or(committed_on);
        let committed_level = as_f64(local.committed_value(level_key)).unwrap_or(0.0);
        let target_level = as_f64(changes.remove(level_key)).unwrap_or(committed_level);
        let live_on = !has_onoff || as_bool(local.live_value(this, on_key)).unwrap_or(false);
        let live_level = as_f64(local.live_value(this, level_key)).unwrap_or(committed_level);

        if !changes.is_empty() {
            local.commit(this, changes);
        }

        let mut finals = ValueMap::from([(level_key.to_string(), Value::Float(target_level))]);
        if has_onoff {
            finals.insert(on_key.to_string(), Value::Bool(target_on));
        }

        self.supersede(level_key);
        let (from, to) = match (live_on, target_on) {
            (false, true) => (0.0, target_level),
            (true, false) => (live_level, 0.0),
            (true, true) => (live_level, target_level),
            (false, false) => {
                local.commit(this, finals);
                return;
            }
        };
        let rising = to > from || (!live_on && target_on);
        let secs = duration.unwrap_or_else(|| configured_duration(local, rising));
        let span = duration_from_secs(secs);
        if span.is_zero() || ((from - to).abs() < f64::EPSILON && live_on == target_on) {
            local.commit(this, finals);
            return;
        }

        if !live_on && target_on {
            let mut switch_on = ValueMap::from([(level_key.to_string(), Value::Float(0.0))]);
            switch_on.insert(on_key.to_string(), Value::Bool(true));
            local.commit(this, switch_on);
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        tracing::debug!(thing = %this.id(), from, to, secs, "starting transition");
        self.lock().insert(
            level_key.to_string(),
            Active {
                generation,
                deadline: started + span,
                finals,
                abort: None,
            },
        );
        let fade = Fade { from, to, started, span };
        let abort = this
            .executor()
            .execute(run(this.downgrade(), level_key, generation, fade));
        match self.lock().get_mut(level_key) {
            Some(active) if active.generation == generation => active.abort = Some(abort),
            _ => abort.abort(),
        }
    }

    fn is_current(&self, key: &str, generation: u64) -> bool {
        self.lock()
            .get(key)
            .is_some_and(|running| running.generation == generation)
    }

    /// Write one intermediate value. Returns `false` once superseded.
    fn tick(&self, this: &Thing, local: &LocalThing, key: &str, generation: u64, value: f64) -> bool {
        if !self.is_current(key, generation) {
            return false;
        }
        local.commit(this, ValueMap::from([(key.to_string(), Value::Float(value))]));
        true
    }

    /// Pin the final values and retire the transition.
    fn finish(&self, this: &Thing, local: &LocalThing, key: &str, generation: u64) {
        let done = {
            let mut active = self.lock();
            if !active
                .get(key)
                .is_some_and(|running| running.generation == generation)
            {
                return;
            }
            active.remove(key)
        };
        if let Some(done) = done {
            local.commit(this, done.finals);
            tracing::debug!(thing = %this.id(), key, "transition settled");
        }
    }
}

fn configured_duration(local: &LocalThing, rising: bool) -> f64 {
    let key = if rising {
        onoff::CONF_DURATION_ON
    } else {
        onoff::CONF_DURATION_OFF
    };
    local
        .committed_value(key.name())
        .and_then(|value| value.as_f64())
        .unwrap_or(onoff::DEFAULT_DURATION)
}

async fn run(thing: crate::thing::WeakThing, key: &'static str, generation: u64, fade: Fade) {
    let mut ticks = tokio::time::interval(TICK_INTERVAL);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticks.tick().await;
        let Some(this) = thing.upgrade() else {
            return;
        };
        let Some(local) = this.as_local() else {
            return;
        };
        let Some(engine) = local.transitions() else {
            return;
        };
        match fade.value_at(Instant::now()) {
            Some(value) => {
                if !engine.tick(&this, local, key, generation, value) {
                    return;
                }
            }
            None => {
                engine.finish(&this, local, key, generation);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use thingmesh_domain::catalog::{level, onoff, transition};
    use thingmesh_domain::modifier::Modifier;

    use crate::executor::Executor;
    use crate::local::LocalThingBuilder;
    use crate::thing::listener::PropertyListener;

    use super::*;

    fn bulb() -> Thing {
        LocalThingBuilder::dimmable_light().build(&Executor::current().unwrap())
    }

    async fn level_of(thing: &Thing) -> f32 {
        thing.fetch_property(&level::STAT_VALUE).await.unwrap().unwrap()
    }

    async fn switch_on(thing: &Thing) {
        thing
            .set_property_with(&onoff::STAT_VALUE, true, &[Modifier::Duration(0.0)])
            .await
            .unwrap();
    }

    #[derive(Default)]
    struct Levels(std::sync::Mutex<Vec<f64>>);

    impl PropertyListener for Levels {
        fn on_property_changed(&self, _: &Thing, _: &str, value: Option<&Value>) {
            if let Some(level) = value.and_then(Value::as_f64) {
                self.0.lock().unwrap().push(level);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn should_clamp_target_before_animating() {
        let thing = bulb();
        switch_on(&thing).await;
        let levels = Arc::new(Levels::default());
        thing.register_property_listener(&level::STAT_VALUE, levels.clone());

        thing.set_property(&level::STAT_VALUE, 100_000.0).await.unwrap();
        for _ in 0..30 {
            tokio::time::sleep(TICK_INTERVAL).await;
            assert!(level_of(&thing).await <= 1.0);
        }
        assert!((level_of(&thing).await - 1.0).abs() < f32::EPSILON);
        let seen = levels.0.lock().unwrap();
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|level| *level <= 1.0));
        assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn should_report_remaining_duration_while_animating() {
        let thing = bulb();
        switch_on(&thing).await;
        thing
            .set_property_with(&level::STAT_VALUE, 1.0, &[Modifier::Duration(1.0)])
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let remaining = thing.fetch_property(&transition::STAT_DURATION).await.unwrap().unwrap();
        assert!(remaining > 0.0 && remaining < 1.0);
        let midway = level_of(&thing).await;
        assert!(midway > 0.0 && midway < 1.0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let remaining = thing.fetch_property(&transition::STAT_DURATION).await.unwrap().unwrap();
        assert!(remaining.abs() < f32::EPSILON);
        assert!((level_of(&thing).await - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn should_supersede_running_transition() {
        let thing = bulb();
        switch_on(&thing).await;
        thing
            .set_property_with(&level::STAT_VALUE, 1.0, &[Modifier::Duration(1.0)])
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        thing
            .set_property_with(&level::STAT_VALUE, 0.25, &[Modifier::Duration(0.5)])
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!((level_of(&thing).await - 0.25).abs() < f32::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn should_increment_from_committed_target() {
        let thing = bulb();
        switch_on(&thing).await;
        thing
            .set_property_with(&level::STAT_VALUE, 0.5, &[Modifier::Duration(1.0)])
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(level_of(&thing).await < 0.5);
        thing.increment_property(&level::STAT_VALUE, 0.25).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!((level_of(&thing).await - 0.75).abs() < f32::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn should_fade_out_then_restore_level_when_turned_off() {
        let thing = bulb();
        thing
            .apply_properties_with(
                ValueMap::from([
                    ("s/onof/v".to_string(), Value::Bool(true)),
                    ("s/levl/v".to_string(), Value::Float(0.8)),
                ]),
                &[Modifier::Duration(0.0)],
            )
            .await
            .unwrap();
        thing.set_property(&onoff::STAT_VALUE, false).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(thing.fetch_property(&onoff::STAT_VALUE).await.unwrap(), Some(true));
        assert!(level_of(&thing).await < 0.8);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(thing.fetch_property(&onoff::STAT_VALUE).await.unwrap(), Some(false));
        assert!((level_of(&thing).await - 0.8).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn should_fade_in_from_zero_when_turned_on() {
        let thing = bulb();
        thing
            .set_property_with(&level::STAT_VALUE, 0.6, &[Modifier::Duration(0.0)])
            .await
            .unwrap();
        thing.set_property(&onoff::STAT_VALUE, true).await.unwrap();
        assert_eq!(thing.fetch_property(&onoff::STAT_VALUE).await.unwrap(), Some(true));
        assert!(level_of(&thing).await < 0.6);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!((level_of(&thing).await - 0.6).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn should_use_duration_written_in_same_apply() {
        let thing = bulb();
        switch_on(&thing).await;
        thing
            .apply_properties(ValueMap::from([
                ("s/levl/v".to_string(), Value::Float(1.0)),
                ("s/tran/d".to_string(), Value::Float(3.0)),
            ]))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(level_of(&thing).await < 0.5);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!((level_of(&thing).await - 1.0).abs() < f32::EPSILON);
    }
}
