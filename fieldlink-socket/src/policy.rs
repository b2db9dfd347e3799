use std::sync::Arc;

use fieldlink_queue::{
    BandwidthControlBuffer, BufferError, GenericController, PacketBuffer, PriorityBuffer,
    QueueBuffer, DEFAULT_QUANTUM,
};

/// Selects the scheduler an endpoint uses for its outgoing packets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BufferPolicy {
    /// A single FIFO queue. Prioritized sends are rejected.
    Queue,
    /// Strict priority over `classes` classes, `0` being the highest.
    Priority { classes: usize },
    /// Bandwidth shared by weight, one class per weight.
    Bandwidth { weights: Vec<u32>, quantum: u32 },
    /// Strict priority over the five named levels.
    #[default]
    Generic,
}

impl BufferPolicy {
    /// Bandwidth sharing with the default quantum.
    pub fn bandwidth(weights: Vec<u32>) -> Self {
        Self::Bandwidth { weights, quantum: DEFAULT_QUANTUM }
    }

    /// Creates the scheduler described by this policy.
    pub fn build(&self) -> Result<Arc<dyn PacketBuffer>, BufferError> {
        Ok(match self {
            Self::Queue => Arc::new(QueueBuffer::new()),
            Self::Priority { classes } => Arc::new(PriorityBuffer::with_classes(*classes)?),
            Self::Bandwidth { weights, quantum } => {
                let classes = weights.iter().map(|_| QueueBuffer::new()).collect();
                Arc::new(BandwidthControlBuffer::new(classes, Some(weights.clone()), *quantum)?)
            }
            Self::Generic => Arc::new(GenericController::new()),
        })
    }
}
