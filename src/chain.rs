//! Processor chain: an ordered, self-modifying list of event processors.
//!
//! Events are pushed into the first processor; each processor forwards,
//! replaces, buffers or adds to them through [`ChainContext::output`], and
//! the last processor's output lands in the chain's sink. Processors may add
//! and remove processors while an event is in flight. Order is derived from
//! each processor's phase and its before/after constraints, and is
//! recomputed before the next dispatch whenever the set changes.

use crate::context::{DocumentContext, SecurityContext};
use crate::error::{WssError, WssResult};
use crate::properties::SecurityProperties;
use crate::xml::{QName, XmlElement, XmlEvent, XmlEventSink};
use tracing::debug;

/// Coarse position of a processor in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Preprocessing,
    Processing,
    Postprocessing,
}

/// A stage of the chain.
pub trait Processor {
    /// Logical name, unique within a chain. Ordering constraints refer to it.
    fn id(&self) -> &str;

    fn phase(&self) -> Phase {
        Phase::Processing
    }

    /// Processors this one must precede.
    fn before(&self) -> Vec<String> {
        Vec::new()
    }

    /// Processors this one must follow.
    fn after(&self) -> Vec<String> {
        Vec::new()
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainContext<'_>) -> WssResult<()>;
}

struct Slot {
    id: String,
    phase: Phase,
    before: Vec<String>,
    after: Vec<String>,
    seq: u64,
    removed: bool,
    state: Option<(Box<dyn Processor>, DocumentContext)>,
}

#[derive(Default)]
struct ChainCore {
    slots: Vec<Slot>,
    next_seq: u64,
    dirty: bool,
}

impl ChainCore {
    fn add(&mut self, processor: Box<dyn Processor>, document: DocumentContext) -> WssResult<()> {
        let id = processor.id().to_string();
        if self.slots.iter().any(|s| s.id == id && !s.removed) {
            return Err(WssError::config(format!("Processor {} is already part of the chain", id)));
        }
        debug!(processor = %id, phase = ?processor.phase(), "Adding processor");
        self.slots.push(Slot {
            phase: processor.phase(),
            before: processor.before(),
            after: processor.after(),
            seq: self.next_seq,
            removed: false,
            state: Some((processor, document)),
            id,
        });
        self.next_seq += 1;
        self.dirty = true;
        Ok(())
    }

    fn remove(&mut self, id: &str) {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.id == id && !s.removed) {
            debug!(processor = %id, "Removing processor");
            slot.removed = true;
            self.dirty = true;
        }
    }

    /// Drop removed processors. Only valid while no event is in flight.
    fn purge(&mut self) {
        self.slots.retain(|s| !s.removed);
    }

    fn must_precede(a: &Slot, b: &Slot) -> bool {
        a.phase < b.phase || a.before.iter().any(|id| id == &b.id) || b.after.iter().any(|id| id == &a.id)
    }

    /// Topological order over the live processors; ties go to the earlier
    /// phase, then to the earlier insertion.
    fn sort(&mut self) -> WssResult<()> {
        if !self.dirty {
            return Ok(());
        }
        let live: Vec<usize> = (0..self.slots.len()).filter(|&i| !self.slots[i].removed).collect();
        let mut indegree: Vec<usize> = live
            .iter()
            .map(|&b| {
                live.iter()
                    .filter(|&&a| a != b && Self::must_precede(&self.slots[a], &self.slots[b]))
                    .count()
            })
            .collect();

        let mut placed = vec![false; live.len()];
        let mut order = Vec::with_capacity(live.len());
        for _ in 0..live.len() {
            let next = (0..live.len())
                .filter(|&k| !placed[k] && indegree[k] == 0)
                .min_by_key(|&k| (self.slots[live[k]].phase, self.slots[live[k]].seq));
            let Some(k) = next else {
                let stuck: Vec<&str> = (0..live.len())
                    .filter(|&k| !placed[k])
                    .map(|k| self.slots[live[k]].id.as_str())
                    .collect();
                return Err(WssError::config(format!(
                    "Conflicting ordering constraints between processors: {}",
                    stuck.join(", ")
                )));
            };
            placed[k] = true;
            order.push(live[k]);
            for j in 0..live.len() {
                if !placed[j] && Self::must_precede(&self.slots[live[k]], &self.slots[live[j]]) {
                    indegree[j] -= 1;
                }
            }
        }

        let mut slots: Vec<Option<Slot>> = std::mem::take(&mut self.slots).into_iter().map(Some).collect();
        let mut sorted: Vec<Slot> = order.iter().filter_map(|&i| slots[i].take()).collect();
        // Removed slots may still hold a running processor; keep them at the end
        sorted.extend(slots.into_iter().flatten());
        self.slots = sorted;
        self.dirty = false;
        debug!(
            order = %self.slots.iter().filter(|s| !s.removed).map(|s| s.id.as_str()).collect::<Vec<_>>().join(" > "),
            "Processor chain ordered"
        );
        Ok(())
    }

    /// Index of the first live processor after `from`.
    fn next(&mut self, from: Option<&str>) -> WssResult<Option<usize>> {
        self.sort()?;
        let start = match from {
            None => 0,
            Some(id) => match self.slots.iter().position(|s| s.id == id && !s.removed) {
                Some(pos) => pos + 1,
                // A removed processor's output goes where it would have gone
                None if self.slots.iter().any(|s| s.id == id) => return Ok(self.first_after_removed(id)),
                None => return Err(WssError::config(format!("Processor {} is not part of the chain", id))),
            },
        };
        Ok((start..self.slots.len()).find(|&i| !self.slots[i].removed))
    }

    fn first_after_removed(&self, id: &str) -> Option<usize> {
        let removed = self.slots.iter().find(|s| s.id == id)?;
        self.slots
            .iter()
            .position(|s| !s.removed && (Self::must_precede(removed, s) || (s.phase == removed.phase && s.seq > removed.seq)))
    }
}

fn dispatch(
    core: &mut ChainCore,
    from: Option<&str>,
    event: XmlEvent,
    security: &mut SecurityContext,
    properties: &SecurityProperties,
    sink: &mut dyn XmlEventSink,
) -> WssResult<()> {
    let Some(index) = core.next(from)? else {
        return sink.write_event(event);
    };
    let id = core.slots[index].id.clone();
    let (mut processor, mut document) = core.slots[index]
        .state
        .take()
        .ok_or_else(|| WssError::config(format!("Processor {} received an event re-entrantly", id)))?;

    document.observe(&event);
    let result = {
        let mut chain = ChainContext {
            core: &mut *core,
            security: &mut *security,
            properties,
            sink: &mut *sink,
            document: &document,
            id: &id,
        };
        processor.process_event(event, &mut chain)
    };

    if let Some(slot) = core.slots.iter_mut().find(|s| s.id == id && s.state.is_none()) {
        slot.state = Some((processor, document));
    }
    result
}

/// View of the chain handed to a processor while it handles an event.
pub struct ChainContext<'a> {
    core: &'a mut ChainCore,
    security: &'a mut SecurityContext,
    properties: &'a SecurityProperties,
    sink: &'a mut dyn XmlEventSink,
    document: &'a DocumentContext,
    id: &'a str,
}

impl<'a> ChainContext<'a> {
    /// Pass `event` to the next processor.
    pub fn output(&mut self, event: XmlEvent) -> WssResult<()> {
        dispatch(
            &mut *self.core,
            Some(self.id),
            event,
            &mut *self.security,
            self.properties,
            &mut *self.sink,
        )
    }

    /// Forward every event of `element`.
    pub fn output_element(&mut self, element: &XmlElement) -> WssResult<()> {
        for event in element.to_events() {
            self.output(event)?;
        }
        Ok(())
    }

    /// Document position of the current processor.
    pub fn document(&self) -> &DocumentContext {
        self.document
    }

    pub fn security_context(&mut self) -> &mut SecurityContext {
        self.security
    }

    pub fn properties(&self) -> &'a SecurityProperties {
        self.properties
    }

    /// Add a processor. It starts at the current document position.
    pub fn add_processor(&mut self, processor: Box<dyn Processor>) -> WssResult<()> {
        self.core.add(processor, self.document.clone())
    }

    pub fn remove_processor(&mut self, id: &str) {
        self.core.remove(id);
    }

    /// Remove the current processor once it returns.
    pub fn remove_self(&mut self) {
        self.core.remove(self.id);
    }

    /// Nested emission of a bounded, balanced event sequence.
    pub fn sub_chain(&mut self) -> SubChain<'_, 'a> {
        SubChain {
            chain: self,
            open: Vec::new(),
        }
    }
}

/// Bounded synthetic sequence injected at the current position. The parent
/// processor resumes once the sequence is closed.
pub struct SubChain<'c, 'a> {
    chain: &'c mut ChainContext<'a>,
    open: Vec<QName>,
}

impl SubChain<'_, '_> {
    pub fn emit(&mut self, event: XmlEvent) -> WssResult<()> {
        match &event {
            XmlEvent::StartElement(start) => self.open.push(start.name.clone()),
            XmlEvent::EndElement(name) => match self.open.pop() {
                Some(open) if &open == name => {}
                _ => return Err(WssError::config(format!("Unbalanced end element {} in sub-chain", name))),
            },
            XmlEvent::StartDocument | XmlEvent::EndDocument => {
                return Err(WssError::config("Document events can not be injected"))
            }
            _ => {}
        }
        self.chain.output(event)
    }

    pub fn emit_element(&mut self, element: &XmlElement) -> WssResult<()> {
        for event in element.to_events() {
            self.emit(event)?;
        }
        Ok(())
    }

    /// End the sequence; every element opened must have been closed.
    pub fn close(self) -> WssResult<()> {
        match self.open.last() {
            None => Ok(()),
            Some(name) => Err(WssError::config(format!("Sub-chain left {} open", name))),
        }
    }
}

/// A chain with its message context and sink.
pub struct ProcessorChain<S: XmlEventSink> {
    core: ChainCore,
    security: SecurityContext,
    properties: SecurityProperties,
    sink: S,
    failed: bool,
}

impl<S: XmlEventSink> ProcessorChain<S> {
    pub fn new(properties: SecurityProperties, security: SecurityContext, sink: S) -> Self {
        Self {
            core: ChainCore::default(),
            security,
            properties,
            sink,
            failed: false,
        }
    }

    pub fn add_processor(&mut self, processor: Box<dyn Processor>) -> WssResult<()> {
        self.core.add(processor, DocumentContext::default())
    }

    pub fn remove_processor(&mut self, id: &str) {
        self.core.remove(id);
        self.core.purge();
    }

    /// Push one event through the chain. After a failure the chain is
    /// closed and rejects further events.
    pub fn process_event(&mut self, event: XmlEvent) -> WssResult<()> {
        if self.failed {
            return Err(WssError::invalid_security("Processor chain closed after a failure"));
        }
        let result = dispatch(
            &mut self.core,
            None,
            event,
            &mut self.security,
            &self.properties,
            &mut self.sink,
        );
        self.core.purge();
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    /// Live processor ids in dispatch order.
    pub fn processor_ids(&mut self) -> WssResult<Vec<String>> {
        self.core.sort()?;
        Ok(self
            .core
            .slots
            .iter()
            .filter(|s| !s.removed)
            .map(|s| s.id.clone())
            .collect())
    }

    pub fn security_context(&self) -> &SecurityContext {
        &self.security
    }

    pub fn security_context_mut(&mut self) -> &mut SecurityContext {
        &mut self.security
    }

    pub fn properties(&self) -> &SecurityProperties {
        &self.properties
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_parts(self) -> (SecurityContext, S) {
        (self.security, self.sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityConfig;
    use crate::xml::StartElement;

    fn properties() -> SecurityProperties {
        SecurityProperties::from_config(SecurityConfig::default()).unwrap()
    }

    /// Appends its id as a text event after every start element.
    struct Tagger {
        id: String,
        phase: Phase,
        before: Vec<String>,
        after: Vec<String>,
    }

    impl Tagger {
        fn new(id: &str, phase: Phase) -> Box<Self> {
            Box::new(Self {
                id: id.to_string(),
                phase,
                before: Vec::new(),
                after: Vec::new(),
            })
        }
    }

    impl Processor for Tagger {
        fn id(&self) -> &str {
            &self.id
        }
        fn phase(&self) -> Phase {
            self.phase
        }
        fn before(&self) -> Vec<String> {
            self.before.clone()
        }
        fn after(&self) -> Vec<String> {
            self.after.clone()
        }
        fn process_event(&mut self, event: XmlEvent, chain: &mut ChainContext<'_>) -> WssResult<()> {
            let is_start = matches!(event, XmlEvent::StartElement(_));
            chain.output(event)?;
            if is_start {
                chain.output(XmlEvent::text(self.id.clone()))?;
            }
            Ok(())
        }
    }

    fn texts(events: &[XmlEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                XmlEvent::Characters(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_phase_then_insertion_order() {
        let mut chain = ProcessorChain::new(properties(), SecurityContext::new(), Vec::new());
        chain.add_processor(Tagger::new("post", Phase::Postprocessing)).unwrap();
        chain.add_processor(Tagger::new("a", Phase::Processing)).unwrap();
        chain.add_processor(Tagger::new("pre", Phase::Preprocessing)).unwrap();
        chain.add_processor(Tagger::new("b", Phase::Processing)).unwrap();
        assert_eq!(chain.processor_ids().unwrap(), vec!["pre", "a", "b", "post"]);

        chain
            .process_event(XmlEvent::start(StartElement::new(QName::local_only("x"))))
            .unwrap();
        let (_, sink) = chain.into_parts();
        // Later processors emit their text first, earlier ones after it
        assert_eq!(texts(&sink), vec!["post", "b", "a", "pre"]);
    }

    #[test]
    fn test_before_after_constraints() {
        let mut chain = ProcessorChain::new(properties(), SecurityContext::new(), Vec::new());
        chain.add_processor(Tagger::new("a", Phase::Processing)).unwrap();
        let mut b = Tagger::new("b", Phase::Processing);
        b.before = vec!["a".into()];
        chain.add_processor(b).unwrap();
        let mut c = Tagger::new("c", Phase::Processing);
        c.after = vec!["d".into()];
        chain.add_processor(c).unwrap();
        chain.add_processor(Tagger::new("d", Phase::Processing)).unwrap();
        assert_eq!(chain.processor_ids().unwrap(), vec!["b", "a", "d", "c"]);
    }

    #[test]
    fn test_conflicting_constraints_rejected() {
        let mut chain = ProcessorChain::new(properties(), SecurityContext::new(), Vec::new());
        let mut a = Tagger::new("a", Phase::Processing);
        a.before = vec!["b".into()];
        let mut b = Tagger::new("b", Phase::Processing);
        b.before = vec!["a".into()];
        chain.add_processor(a).unwrap();
        chain.add_processor(b).unwrap();
        let err = chain.processor_ids().unwrap_err();
        assert!(err.message.contains("Conflicting ordering constraints"));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut chain = ProcessorChain::new(properties(), SecurityContext::new(), Vec::new());
        chain.add_processor(Tagger::new("a", Phase::Processing)).unwrap();
        assert!(chain.add_processor(Tagger::new("a", Phase::Processing)).is_err());
    }

    /// Installs a successor on the first event, then removes itself.
    struct HandOff {
        installed: bool,
    }

    impl Processor for HandOff {
        fn id(&self) -> &str {
            "hand-off"
        }
        fn process_event(&mut self, event: XmlEvent, chain: &mut ChainContext<'_>) -> WssResult<()> {
            if !self.installed {
                self.installed = true;
                chain.add_processor(Tagger::new("final", Phase::Postprocessing))?;
                chain.remove_self();
            }
            chain.output(event)
        }
    }

    #[test]
    fn test_self_removal_and_successor() {
        let mut chain = ProcessorChain::new(properties(), SecurityContext::new(), Vec::new());
        chain.add_processor(Box::new(HandOff { installed: false })).unwrap();
        chain
            .process_event(XmlEvent::start(StartElement::new(QName::local_only("x"))))
            .unwrap();
        assert_eq!(chain.processor_ids().unwrap(), vec!["final"]);
        chain.process_event(XmlEvent::end(QName::local_only("x"))).unwrap();
        let (_, sink) = chain.into_parts();
        assert_eq!(texts(&sink), vec!["final"]);
    }

    /// Injects an element after every start element through a sub-chain.
    struct Injector {
        balanced: bool,
    }

    impl Processor for Injector {
        fn id(&self) -> &str {
            "injector"
        }
        fn process_event(&mut self, event: XmlEvent, chain: &mut ChainContext<'_>) -> WssResult<()> {
            let is_start = matches!(event, XmlEvent::StartElement(_));
            chain.output(event)?;
            if is_start && chain.document().depth() == 1 {
                let mut sub = chain.sub_chain();
                sub.emit(XmlEvent::start(StartElement::new(QName::local_only("injected"))))?;
                if self.balanced {
                    sub.emit(XmlEvent::end(QName::local_only("injected")))?;
                }
                sub.close()?;
            }
            Ok(())
        }
    }

    #[test]
    fn test_sub_chain_reaches_later_processors() {
        let mut chain = ProcessorChain::new(properties(), SecurityContext::new(), Vec::new());
        chain.add_processor(Box::new(Injector { balanced: true })).unwrap();
        chain.add_processor(Tagger::new("after", Phase::Postprocessing)).unwrap();
        chain
            .process_event(XmlEvent::start(StartElement::new(QName::local_only("root"))))
            .unwrap();
        let (_, sink) = chain.into_parts();
        assert_eq!(sink.len(), 5);
        assert!(sink[2].is_start_of(&QName::local_only("injected")));
        assert_eq!(texts(&sink), vec!["after", "after"]);
    }

    #[test]
    fn test_unbalanced_sub_chain_fails_and_closes_chain() {
        let mut chain = ProcessorChain::new(properties(), SecurityContext::new(), Vec::new());
        chain.add_processor(Box::new(Injector { balanced: false })).unwrap();
        assert!(chain
            .process_event(XmlEvent::start(StartElement::new(QName::local_only("root"))))
            .is_err());
        assert!(chain.process_event(XmlEvent::end(QName::local_only("root"))).is_err());
    }
}
