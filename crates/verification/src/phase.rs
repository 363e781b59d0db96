//! Phases, their ordered steps and the fixed payload schema of each step.

use domain::TransferStatus;
use serde::{Deserialize, Serialize};

/// A verification phase. Each phase is open while the transfer sits in one
/// status and closing it moves the transfer forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Pickup,
    Delivery,
}

const PICKUP_STEPS: &[StepKey] = &[
    StepKey::Summary,
    StepKey::ExteriorPhotos,
    StepKey::InteriorPhotos,
    StepKey::Signature,
    StepKey::Confirmation,
];

const DELIVERY_STEPS: &[StepKey] = &[
    StepKey::Summary,
    StepKey::ExteriorPhotos,
    StepKey::InteriorPhotos,
    StepKey::RecipientIdentity,
    StepKey::Handover,
    StepKey::Confirmation,
];

impl Phase {
    pub fn steps(&self) -> &'static [StepKey] {
        match self {
            Phase::Pickup => PICKUP_STEPS,
            Phase::Delivery => DELIVERY_STEPS,
        }
    }

    pub fn step_index(&self, step: StepKey) -> Option<usize> {
        self.steps().iter().position(|s| *s == step)
    }

    /// Status in which payloads for this phase are accepted.
    pub fn open_status(&self) -> TransferStatus {
        match self {
            Phase::Pickup => TransferStatus::Assigned,
            Phase::Delivery => TransferStatus::RequestFinish,
        }
    }

    /// Status the transfer moves to once the phase closes.
    pub fn closing_status(&self) -> TransferStatus {
        match self {
            Phase::Pickup => TransferStatus::PickedUp,
            Phase::Delivery => TransferStatus::Delivered,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Pickup => "pickup",
            Phase::Delivery => "delivery",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pickup" => Ok(Phase::Pickup),
            "delivery" => Ok(Phase::Delivery),
            other => Err(format!("unknown phase: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKey {
    Summary,
    ExteriorPhotos,
    InteriorPhotos,
    /// Pickup signature with optional comments.
    Signature,
    RecipientIdentity,
    /// Final handover of vehicle and keys.
    Handover,
    Confirmation,
}

impl StepKey {
    /// Slots that must hold a reference before the step is complete.
    pub fn required_slots(&self) -> &'static [PayloadSlot] {
        use PayloadSlot::*;

        match self {
            StepKey::Summary | StepKey::Confirmation => &[],
            StepKey::ExteriorPhotos => &[
                Front,
                Rear,
                LeftSide,
                RightSide,
                FrontThreeQuarter,
                RearThreeQuarter,
            ],
            StepKey::InteriorPhotos => {
                &[Dashboard, Odometer, FrontSeats, RearSeats, Trunk, FuelGauge]
            }
            StepKey::Signature => &[SignatureImage, SignerName],
            StepKey::RecipientIdentity => &[IdFront, IdBack],
            StepKey::Handover => &[RecipientSignature, KeysPhoto],
        }
    }

    pub fn optional_slots(&self) -> &'static [PayloadSlot] {
        match self {
            StepKey::Signature | StepKey::Handover => &[PayloadSlot::Comments],
            _ => &[],
        }
    }

    pub fn accepts(&self, slot: PayloadSlot) -> bool {
        self.required_slots().contains(&slot) || self.optional_slots().contains(&slot)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKey::Summary => "summary",
            StepKey::ExteriorPhotos => "exterior_photos",
            StepKey::InteriorPhotos => "interior_photos",
            StepKey::Signature => "signature",
            StepKey::RecipientIdentity => "recipient_identity",
            StepKey::Handover => "handover",
            StepKey::Confirmation => "confirmation",
        }
    }
}

impl std::fmt::Display for StepKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            StepKey::Summary,
            StepKey::ExteriorPhotos,
            StepKey::InteriorPhotos,
            StepKey::Signature,
            StepKey::RecipientIdentity,
            StepKey::Handover,
            StepKey::Confirmation,
        ]
        .into_iter()
        .find(|step| step.as_str() == s)
        .ok_or_else(|| format!("unknown step: {s}"))
    }
}

/// A named slot for one captured artifact (photo, signature, name).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadSlot {
    // exterior
    Front,
    Rear,
    LeftSide,
    RightSide,
    FrontThreeQuarter,
    RearThreeQuarter,
    // interior
    Dashboard,
    Odometer,
    FrontSeats,
    RearSeats,
    Trunk,
    FuelGauge,
    // signature / handover
    SignatureImage,
    SignerName,
    Comments,
    RecipientSignature,
    KeysPhoto,
    // recipient identity
    IdFront,
    IdBack,
}

impl PayloadSlot {
    const ALL: [PayloadSlot; 19] = [
        PayloadSlot::Front,
        PayloadSlot::Rear,
        PayloadSlot::LeftSide,
        PayloadSlot::RightSide,
        PayloadSlot::FrontThreeQuarter,
        PayloadSlot::RearThreeQuarter,
        PayloadSlot::Dashboard,
        PayloadSlot::Odometer,
        PayloadSlot::FrontSeats,
        PayloadSlot::RearSeats,
        PayloadSlot::Trunk,
        PayloadSlot::FuelGauge,
        PayloadSlot::SignatureImage,
        PayloadSlot::SignerName,
        PayloadSlot::Comments,
        PayloadSlot::RecipientSignature,
        PayloadSlot::KeysPhoto,
        PayloadSlot::IdFront,
        PayloadSlot::IdBack,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadSlot::Front => "front",
            PayloadSlot::Rear => "rear",
            PayloadSlot::LeftSide => "left_side",
            PayloadSlot::RightSide => "right_side",
            PayloadSlot::FrontThreeQuarter => "front_three_quarter",
            PayloadSlot::RearThreeQuarter => "rear_three_quarter",
            PayloadSlot::Dashboard => "dashboard",
            PayloadSlot::Odometer => "odometer",
            PayloadSlot::FrontSeats => "front_seats",
            PayloadSlot::RearSeats => "rear_seats",
            PayloadSlot::Trunk => "trunk",
            PayloadSlot::FuelGauge => "fuel_gauge",
            PayloadSlot::SignatureImage => "signature_image",
            PayloadSlot::SignerName => "signer_name",
            PayloadSlot::Comments => "comments",
            PayloadSlot::RecipientSignature => "recipient_signature",
            PayloadSlot::KeysPhoto => "keys_photo",
            PayloadSlot::IdFront => "id_front",
            PayloadSlot::IdBack => "id_back",
        }
    }
}

impl std::fmt::Display for PayloadSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PayloadSlot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PayloadSlot::ALL
            .into_iter()
            .find(|slot| slot.as_str() == s)
            .ok_or_else(|| format!("unknown slot: {s}"))
    }
}
