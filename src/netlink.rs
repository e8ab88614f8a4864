use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result, anyhow};
use futures::TryStreamExt;
use netlink_packet_route::AddressFamily;
use netlink_packet_route::address::{AddressHeaderFlags, AddressScope};
use netlink_packet_route::link::{LinkAttribute, LinkMessage};
use rtnetlink::{Handle as NlHandle, LinkUnspec, new_connection};
use tokio::runtime::Handle as RtHandle;

use crate::rename::LinkOps;

pub struct NetlinkConnection {
    handle: NlHandle,
}

impl NetlinkConnection {
    pub fn new() -> Result<Self> {
        let rt = RtHandle::try_current().map_err(|_| anyhow!("tokio is not running"))?;
        let (connection, handle, _) =
            new_connection().map_err(|e| anyhow!("unable to create netlink socket: {}", e))?;
        rt.spawn(connection);
        Ok(Self { handle })
    }

    async fn ifindex(&self, name: &str) -> Result<u32> {
        let mut links = self
            .handle
            .link()
            .get()
            .match_name(name.to_string())
            .execute();
        let link = links
            .try_next()
            .await
            .with_context(|| format!("failed to look up interface {}", name))?;
        link.map(|msg| msg.header.index)
            .ok_or_else(|| anyhow!("no interface named {}", name))
    }

    async fn link_set(&self, message: LinkMessage) -> Result<()> {
        let err = format!("failed to set link attributes: {:?}", &message);
        self.handle.link().set(message).execute().await.context(err)
    }

    pub async fn link_up(&self, name: &str) -> Result<()> {
        let ifindex = self.ifindex(name).await?;
        self.link_set(LinkUnspec::new_with_index(ifindex).up().build())
            .await
            .with_context(|| format!("failed to set link {} up", name))
    }

    pub async fn link_down(&self, name: &str) -> Result<()> {
        let ifindex = self.ifindex(name).await?;
        self.link_set(LinkUnspec::new_with_index(ifindex).down().build())
            .await
            .with_context(|| format!("failed to set link {} down", name))
    }

    pub async fn link_rename(&self, from: &str, to: &str) -> Result<()> {
        let ifindex = self.ifindex(from).await?;
        self.link_set(
            LinkUnspec::new_with_index(ifindex)
                .name(to.to_string())
                .build(),
        )
        .await
        .with_context(|| format!("failed to rename link {} to {}", from, to))
    }

    async fn names_by_index(&self) -> Result<HashMap<u32, String>> {
        let mut names = HashMap::new();
        let mut links = self.handle.link().get().execute();
        while let Some(link) = links.try_next().await? {
            for nla in &link.attributes {
                if let LinkAttribute::IfName(name) = nla {
                    names.insert(link.header.index, name.clone());
                }
            }
        }
        Ok(names)
    }

    // Names of interfaces holding any IPv4 address, or a permanent
    // global-scope IPv6 address. IPv4 addresses are deliberately not
    // filtered by scope or lifetime.
    pub async fn addressed_names(&self) -> Result<HashSet<String>> {
        let names = self.names_by_index().await?;
        let mut result = HashSet::new();
        let mut addrs = self.handle.address().get().execute();
        while let Some(msg) = addrs.try_next().await? {
            let live = match msg.header.family {
                AddressFamily::Inet => true,
                AddressFamily::Inet6 => {
                    msg.header.scope == AddressScope::Universe
                        && msg.header.flags.contains(AddressHeaderFlags::Permanent)
                }
                _ => false,
            };
            if live && let Some(name) = names.get(&msg.header.index) {
                result.insert(name.clone());
            }
        }
        Ok(result)
    }
}

// Synchronous facade over the async netlink handle, holding the runtime
// handle the way the engine expects its link operations: one blocking call
// per operation.
pub struct NetlinkLinkOps {
    rt: RtHandle,
    nl: NetlinkConnection,
}

impl NetlinkLinkOps {
    pub fn new(rt: RtHandle) -> Result<Self> {
        let nl = {
            let _guard = rt.enter();
            NetlinkConnection::new()?
        };
        Ok(Self { rt, nl })
    }
}

impl LinkOps for NetlinkLinkOps {
    fn link_up(&self, name: &str) -> Result<()> {
        self.rt.block_on(self.nl.link_up(name))
    }

    fn link_down(&self, name: &str) -> Result<()> {
        self.rt.block_on(self.nl.link_down(name))
    }

    fn link_rename(&self, from: &str, to: &str) -> Result<()> {
        self.rt.block_on(self.nl.link_rename(from, to))
    }

    fn addressed_names(&self) -> Result<HashSet<String>> {
        self.rt.block_on(self.nl.addressed_names())
    }
}
