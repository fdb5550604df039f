/// Room name to heater address mapping, loaded from a JSON file
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

use log::info;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;

use crate::error::{HeaterError, Result};
use crate::models::DeviceAddress;

/// ```json
/// { "bathroom": ["CC:22:37:11:30:EC"], "living room": ["CC:22:37:11:5D:02", "CC:22:37:11:1E:84"] }
/// ```
///
/// Device order inside a room is kept and is the order commands fan out in.
/// A device may be listed in several rooms.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomRegistry {
    rooms: BTreeMap<String, Vec<DeviceAddress>>,
}

impl RoomRegistry {
    pub fn from_rooms<I, S, A>(rooms: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Vec<A>)>,
        S: Into<String>,
        A: AsRef<str>,
    {
        let mut registry = BTreeMap::new();
        for (name, addresses) in rooms {
            let name = name.into().trim().to_string();
            if name.is_empty() {
                return Err(HeaterError::Config("room name cannot be empty".into()));
            }

            let mut seen = HashSet::new();
            let mut devices = Vec::with_capacity(addresses.len());
            for address in addresses {
                let address = DeviceAddress::new(address);
                if address.as_str().is_empty() {
                    return Err(HeaterError::Config(format!(
                        "room '{}' lists an empty device address",
                        name
                    )));
                }
                if !seen.insert(address.clone()) {
                    return Err(HeaterError::Config(format!(
                        "room '{}' lists {} more than once",
                        name, address
                    )));
                }
                devices.push(address);
            }

            if registry.insert(name.clone(), devices).is_some() {
                return Err(HeaterError::Config(format!("room '{}' defined twice", name)));
            }
        }
        Ok(RoomRegistry { rooms: registry })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let RoomEntries(rooms) = serde_json::from_str(json)?;
        RoomRegistry::from_rooms(rooms)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            HeaterError::Config(format!("failed to read room file {}: {}", path.display(), e))
        })?;
        let registry = RoomRegistry::from_json(&json)?;
        info!(
            "Loaded {} rooms with {} heaters from {}",
            registry.rooms.len(),
            registry.rooms.values().map(Vec::len).sum::<usize>(),
            path.display()
        );
        Ok(registry)
    }

    /// Heaters in a room, in stored order
    pub fn devices(&self, room: &str) -> Result<&[DeviceAddress]> {
        self.rooms
            .get(room.trim())
            .map(Vec::as_slice)
            .ok_or_else(|| HeaterError::RoomNotFound(room.to_string()))
    }

    pub fn room_names(&self) -> Vec<&str> {
        self.rooms.keys().map(String::as_str).collect()
    }

    /// Every room a heater is assigned to
    pub fn rooms_for(&self, address: &DeviceAddress) -> Vec<&str> {
        self.rooms
            .iter()
            .filter(|(_, devices)| devices.contains(address))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

/// Room entries in file order, keeping repeated keys so they can be rejected
struct RoomEntries(Vec<(String, Vec<String>)>);

impl<'de> Deserialize<'de> for RoomEntries {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = RoomEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of room names to device address lists")
            }

            fn visit_map<M>(self, mut map: M) -> std::result::Result<RoomEntries, M::Error>
            where
                M: MapAccess<'de>,
            {
                let mut entries: Vec<(String, Vec<String>)> =
                    Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry()? {
                    entries.push(entry);
                }
                Ok(RoomEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}
