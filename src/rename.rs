use std::collections::{HashMap, HashSet};

use anyhow::{Result, anyhow};
use log::debug;

use crate::config::RenameRequest;
use crate::inventory;
use crate::sysfs::{self, DeviceReader};

// Prefix for synthetic names used to park an interface whose name is wanted
// by another. The counter suffix is run-scoped and never reused.
const TMP_NAME_PREFIX: &str = "ciren";

// Side-effecting link operations. Implemented over netlink for real
// interfaces and by a recording fake in tests.
pub trait LinkOps {
    fn link_up(&self, name: &str) -> Result<()>;
    fn link_down(&self, name: &str) -> Result<()>;
    fn link_rename(&self, from: &str, to: &str) -> Result<()>;
    // Names of interfaces holding addresses that would be lost by bringing
    // the link down: any IPv4 address, or a permanent global-scope IPv6
    // address.
    fn addressed_names(&self) -> Result<HashSet<String>>;
}

// Working state for one currently-known mac, mutated in place as the plan
// is built so later requests see the effects of earlier ones.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RenameInfo {
    pub name: String,
    pub up: bool,
    pub downable: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LinkOp {
    Down(String),
    Up(String),
    Rename { from: String, to: String },
}

// An operation tagged with the request that produced it, for error reports.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlannedOp {
    pub op: LinkOp,
    pub mac: String,
    pub target: String,
}

impl PlannedOp {
    fn new(op: LinkOp, req: &RenameRequest) -> Self {
        Self {
            op,
            mac: req.mac.clone(),
            target: req.name.clone(),
        }
    }
}

// Snapshot the current mac to {name, up, downable} state from live kernel
// queries. Recomputed once per engine invocation.
pub fn current_rename_info(
    reader: &dyn DeviceReader,
    links: &dyn LinkOps,
) -> Result<HashMap<String, RenameInfo>> {
    let addressed = links.addressed_names()?;
    let mut by_mac = HashMap::new();
    for (mac, name) in inventory::interfaces_by_mac(reader)? {
        let up = sysfs::is_up(reader, &name);
        let downable = !up || !addressed.contains(&name);
        by_mac.insert(mac, RenameInfo { name, up, downable });
    }
    Ok(by_mac)
}

// Resolve the requested renames against live state and execute the plan.
// Execution is best effort: individual failures are collected and reported
// once as a single aggregated error, never aborting the remaining plan.
pub fn apply_renames(
    reader: &dyn DeviceReader,
    links: &dyn LinkOps,
    renames: &[RenameRequest],
    strict_present: bool,
    strict_busy: bool,
) -> Result<()> {
    if renames.is_empty() {
        debug!("no interfaces to rename");
        return Ok(());
    }
    let mut current = current_rename_info(reader, links)?;
    rename_interfaces(links, renames, &mut current, strict_present, strict_busy)
}

pub fn rename_interfaces(
    links: &dyn LinkOps,
    renames: &[RenameRequest],
    current: &mut HashMap<String, RenameInfo>,
    strict_present: bool,
    strict_busy: bool,
) -> Result<()> {
    let (ops, ups, mut errors) = plan_renames(renames, current, strict_present, strict_busy);

    if ops.is_empty() && ups.is_empty() {
        if errors.is_empty() {
            debug!("no work necessary for renaming of {:?}", renames);
        } else {
            debug!("unable to do any work for renaming of {:?}", renames);
        }
    } else {
        debug!("achieving renaming with ops {:?} then ups {:?}", ops, ups);
        for planned in ops.iter().chain(ups.iter()) {
            if let Err(e) = execute_op(links, planned) {
                errors.push(format!(
                    "[unknown] error performing {:?} for mac={}, {}: {}",
                    planned.op, planned.mac, planned.target, e
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(anyhow!(errors.join("\n")))
    }
}

// Single planning pass over the requests in caller-supplied order. Returns
// the ordered conflict-resolution and rename operations, the deferred up
// operations to run at the very end, and any per-request errors admitted by
// the strictness flags.
pub fn plan_renames(
    renames: &[RenameRequest],
    current: &mut HashMap<String, RenameInfo>,
    strict_present: bool,
    strict_busy: bool,
) -> (Vec<PlannedOp>, Vec<PlannedOp>, Vec<String>) {
    let mut ops = Vec::new();
    let mut ups = Vec::new();
    let mut errors = Vec::new();
    let mut tmp_counter = 0u32;

    for req in renames {
        let Some(cur_name) = current.get(&req.mac).map(|info| info.name.clone()) else {
            if strict_present {
                errors.push(format!(
                    "[nic not present] cannot rename mac={} to {}, not available",
                    req.mac, req.name
                ));
            }
            continue;
        };
        if cur_name == req.name {
            continue;
        }

        let mut cur_ops = Vec::new();

        // A moved interface is downed now but brought back up only once, at
        // its final name, in the deferred up phase.
        if let Some(info) = current.get_mut(&req.mac)
            && info.up
        {
            if !info.downable {
                if strict_busy {
                    errors.push(format!(
                        "[busy] error renaming mac={} from {} to {}",
                        req.mac, cur_name, req.name
                    ));
                }
                continue;
            }
            info.up = false;
            cur_ops.push(PlannedOp::new(LinkOp::Down(cur_name.clone()), req));
            ups.push(PlannedOp::new(LinkOp::Up(req.name.clone()), req));
        }

        // The target name may be held by another interface; park that one
        // under a fresh placeholder to free the name.
        if let Some(occupant_mac) = index_by_name(current).get(&req.name).cloned() {
            let (occ_up, occ_downable) = match current.get(&occupant_mac) {
                Some(occ) => (occ.up, occ.downable),
                None => (false, true),
            };
            if occ_up && !occ_downable {
                if strict_busy {
                    errors.push(format!(
                        "[busy-target] error renaming mac={} from {} to {}",
                        req.mac, cur_name, req.name
                    ));
                }
                continue;
            }
            if occ_up {
                cur_ops.push(PlannedOp::new(LinkOp::Down(req.name.clone()), req));
            }
            let tmp_name = next_tmp_name(&mut tmp_counter, current);
            cur_ops.push(PlannedOp::new(
                LinkOp::Rename {
                    from: req.name.clone(),
                    to: tmp_name.clone(),
                },
                req,
            ));
            if let Some(occ) = current.get_mut(&occupant_mac) {
                occ.name = tmp_name.clone();
            }
            if occ_up {
                ups.push(PlannedOp::new(LinkOp::Up(tmp_name), req));
            }
        }

        cur_ops.push(PlannedOp::new(
            LinkOp::Rename {
                from: cur_name,
                to: req.name.clone(),
            },
            req,
        ));
        if let Some(info) = current.get_mut(&req.mac) {
            info.name = req.name.clone();
        }
        ops.extend(cur_ops);
    }

    (ops, ups, errors)
}

fn index_by_name(current: &HashMap<String, RenameInfo>) -> HashMap<String, String> {
    current
        .iter()
        .map(|(mac, info)| (info.name.clone(), mac.clone()))
        .collect()
}

fn next_tmp_name(counter: &mut u32, current: &HashMap<String, RenameInfo>) -> String {
    let in_use = index_by_name(current);
    loop {
        let name = format!("{}{}", TMP_NAME_PREFIX, counter);
        *counter += 1;
        if !in_use.contains_key(&name) {
            return name;
        }
    }
}

fn execute_op(links: &dyn LinkOps, planned: &PlannedOp) -> Result<()> {
    match &planned.op {
        LinkOp::Down(name) => links.link_down(name),
        LinkOp::Up(name) => links.link_up(name),
        LinkOp::Rename { from, to } => links.link_rename(from, to),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::sysfs::testing::FakeReader;

    #[derive(Debug, Default)]
    struct FakeLinks {
        executed: RefCell<Vec<String>>,
        addressed: HashSet<String>,
        // Op descriptions that should fail when executed.
        failing: HashSet<String>,
    }

    impl FakeLinks {
        fn run(&self, desc: String) -> Result<()> {
            self.executed.borrow_mut().push(desc.clone());
            if self.failing.contains(&desc) {
                return Err(anyhow!("injected failure"));
            }
            Ok(())
        }
    }

    impl LinkOps for FakeLinks {
        fn link_up(&self, name: &str) -> Result<()> {
            self.run(format!("up {}", name))
        }

        fn link_down(&self, name: &str) -> Result<()> {
            self.run(format!("down {}", name))
        }

        fn link_rename(&self, from: &str, to: &str) -> Result<()> {
            self.run(format!("rename {} {}", from, to))
        }

        fn addressed_names(&self) -> Result<HashSet<String>> {
            Ok(self.addressed.clone())
        }
    }

    fn info(name: &str, up: bool, downable: bool) -> RenameInfo {
        RenameInfo {
            name: name.to_string(),
            up,
            downable,
        }
    }

    fn req(mac: &str, name: &str) -> RenameRequest {
        RenameRequest {
            mac: mac.to_string(),
            name: name.to_string(),
        }
    }

    const MAC_A: &str = "00:11:22:33:44:55";
    const MAC_B: &str = "66:77:88:99:aa:bb";

    fn op_descs(ops: &[PlannedOp]) -> Vec<String> {
        ops.iter()
            .map(|p| match &p.op {
                LinkOp::Down(name) => format!("down {}", name),
                LinkOp::Up(name) => format!("up {}", name),
                LinkOp::Rename { from, to } => format!("rename {} {}", from, to),
            })
            .collect()
    }

    #[test]
    fn test_plan_conflicting_rename() {
        // A is eth0 (up), wants eth1; B holds eth1 (up, downable). B is
        // parked under a placeholder and both come back up at their final
        // names, only in the up phase.
        let mut current = [
            (MAC_A.to_string(), info("eth0", true, true)),
            (MAC_B.to_string(), info("eth1", true, true)),
        ]
        .into_iter()
        .collect();
        let (ops, ups, errors) = plan_renames(&[req(MAC_A, "eth1")], &mut current, true, true);
        assert_eq!(errors, Vec::<String>::new());
        assert_eq!(
            op_descs(&ops),
            vec!["down eth0", "down eth1", "rename eth1 ciren0", "rename eth0 eth1"]
        );
        assert_eq!(op_descs(&ups), vec!["up eth1", "up ciren0"]);
        assert_eq!(current[MAC_A].name, "eth1");
        assert_eq!(current[MAC_B].name, "ciren0");
    }

    #[test]
    fn test_plan_noop_when_name_matches() {
        let mut current = [(MAC_A.to_string(), info("eth0", true, false))]
            .into_iter()
            .collect();
        let (ops, ups, errors) = plan_renames(&[req(MAC_A, "eth0")], &mut current, true, true);
        assert_eq!(ops, Vec::new());
        assert_eq!(ups, Vec::new());
        assert_eq!(errors, Vec::<String>::new());
    }

    #[test]
    fn test_plan_second_run_is_idempotent() {
        let renames = [req(MAC_A, "eth1"), req(MAC_B, "eth0")];
        let mut current = [
            (MAC_A.to_string(), info("eth0", false, true)),
            (MAC_B.to_string(), info("eth1", false, true)),
        ]
        .into_iter()
        .collect();
        let (ops, _, _) = plan_renames(&renames, &mut current, true, true);
        assert!(!ops.is_empty());
        // The working state now satisfies every request; a second pass has
        // nothing to do.
        let (ops, ups, errors) = plan_renames(&renames, &mut current, true, true);
        assert_eq!(ops, Vec::new());
        assert_eq!(ups, Vec::new());
        assert_eq!(errors, Vec::<String>::new());
    }

    #[test]
    fn test_plan_missing_mac() {
        let mut current = HashMap::new();
        let (ops, ups, errors) = plan_renames(&[req(MAC_A, "eth0")], &mut current, false, true);
        assert_eq!(ops, Vec::new());
        assert_eq!(ups, Vec::new());
        assert_eq!(errors, Vec::<String>::new());

        let (_, _, errors) = plan_renames(&[req(MAC_A, "eth0")], &mut current, true, true);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("[nic not present]"));
    }

    #[test]
    fn test_plan_busy_source() {
        let mut current: HashMap<_, _> = [(MAC_A.to_string(), info("eth0", true, false))]
            .into_iter()
            .collect();
        let (ops, _, errors) = plan_renames(&[req(MAC_A, "eth1")], &mut current, true, true);
        assert_eq!(ops, Vec::new());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("[busy]"));

        // Not strict: the request is skipped silently.
        let (ops, ups, errors) = plan_renames(&[req(MAC_A, "eth1")], &mut current, true, false);
        assert_eq!(ops, Vec::new());
        assert_eq!(ups, Vec::new());
        assert_eq!(errors, Vec::<String>::new());
    }

    #[test]
    fn test_plan_busy_target() {
        let mut current: HashMap<_, _> = [
            (MAC_A.to_string(), info("eth0", false, true)),
            (MAC_B.to_string(), info("eth1", true, false)),
        ]
        .into_iter()
        .collect();
        let (ops, _, errors) = plan_renames(&[req(MAC_A, "eth1")], &mut current, true, true);
        assert_eq!(ops, Vec::new());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("[busy-target]"));

        let (ops, _, errors) = plan_renames(&[req(MAC_A, "eth1")], &mut current, true, false);
        assert_eq!(ops, Vec::new());
        assert_eq!(errors, Vec::<String>::new());
    }

    #[test]
    fn test_plan_downed_occupant_is_not_brought_up() {
        let mut current = [
            (MAC_A.to_string(), info("eth0", false, true)),
            (MAC_B.to_string(), info("eth1", false, true)),
        ]
        .into_iter()
        .collect();
        let (ops, ups, errors) = plan_renames(&[req(MAC_A, "eth1")], &mut current, true, true);
        assert_eq!(errors, Vec::<String>::new());
        assert_eq!(
            op_descs(&ops),
            vec!["rename eth1 ciren0", "rename eth0 eth1"]
        );
        assert_eq!(ups, Vec::new());
    }

    #[test]
    fn test_plan_placeholder_skips_existing_names() {
        let mut current = [
            (MAC_A.to_string(), info("eth0", false, true)),
            (MAC_B.to_string(), info("eth1", false, true)),
            ("cc:cc:cc:cc:cc:cc".to_string(), info("ciren0", false, true)),
        ]
        .into_iter()
        .collect();
        let (ops, _, _) = plan_renames(&[req(MAC_A, "eth1")], &mut current, true, true);
        assert_eq!(
            op_descs(&ops),
            vec!["rename eth1 ciren1", "rename eth0 eth1"]
        );
    }

    #[test]
    fn test_plan_swap_chains_through_placeholder() {
        // Swapping two names: the second request finds its target already
        // renamed to the placeholder by the working state.
        let mut current = [
            (MAC_A.to_string(), info("eth0", false, true)),
            (MAC_B.to_string(), info("eth1", false, true)),
        ]
        .into_iter()
        .collect();
        let renames = [req(MAC_A, "eth1"), req(MAC_B, "eth0")];
        let (ops, ups, errors) = plan_renames(&renames, &mut current, true, true);
        assert_eq!(errors, Vec::<String>::new());
        assert_eq!(ups, Vec::new());
        assert_eq!(
            op_descs(&ops),
            vec![
                "rename eth1 ciren0",
                "rename eth0 eth1",
                "rename ciren0 eth0"
            ]
        );
        assert_eq!(current[MAC_A].name, "eth1");
        assert_eq!(current[MAC_B].name, "eth0");
    }

    #[test]
    fn test_rename_interfaces_executes_in_order() {
        let links = FakeLinks::default();
        let mut current = [
            (MAC_A.to_string(), info("eth0", true, true)),
            (MAC_B.to_string(), info("eth1", true, true)),
        ]
        .into_iter()
        .collect();
        rename_interfaces(&links, &[req(MAC_A, "eth1")], &mut current, true, true).unwrap();
        assert_eq!(
            *links.executed.borrow(),
            vec![
                "down eth0",
                "down eth1",
                "rename eth1 ciren0",
                "rename eth0 eth1",
                "up eth1",
                "up ciren0"
            ]
        );
    }

    #[test]
    fn test_rename_interfaces_partial_failure() {
        // A failing operation is recorded but does not block independent
        // later operations.
        let links = FakeLinks {
            failing: ["rename eth0 eth2".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let mut current = [
            (MAC_A.to_string(), info("eth0", false, true)),
            (MAC_B.to_string(), info("eth1", false, true)),
        ]
        .into_iter()
        .collect();
        let renames = [req(MAC_A, "eth2"), req(MAC_B, "eth3")];
        let err =
            rename_interfaces(&links, &renames, &mut current, true, true).unwrap_err();
        assert!(err.to_string().contains("rename eth0 eth2"));
        assert_eq!(
            *links.executed.borrow(),
            vec!["rename eth0 eth2", "rename eth1 eth3"]
        );
    }

    #[test]
    fn test_apply_renames_empty_is_noop() {
        let links = FakeLinks::default();
        let reader = FakeReader::new();
        apply_renames(&reader, &links, &[], true, true).unwrap();
        assert_eq!(*links.executed.borrow(), Vec::<String>::new());
    }

    #[test]
    fn test_current_rename_info_downable() {
        let reader = FakeReader::new()
            .with_attr("eth0", "addr_assign_type", "0")
            .with_attr("eth0", "address", MAC_A)
            .with_attr("eth0", "operstate", "up")
            .with_attr("eth1", "addr_assign_type", "0")
            .with_attr("eth1", "address", MAC_B)
            .with_attr("eth1", "operstate", "down");
        let links = FakeLinks {
            addressed: ["eth0".to_string(), "eth1".to_string()]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        let current = current_rename_info(&reader, &links).unwrap();
        // Up with a live address: not downable.
        assert_eq!(current[MAC_A], info("eth0", true, false));
        // Already down: downable no matter what addresses say.
        assert_eq!(current[MAC_B], info("eth1", false, true));
    }

    #[test]
    fn test_apply_renames_end_to_end() {
        let reader = FakeReader::new()
            .with_attr("enx3", "addr_assign_type", "0")
            .with_attr("enx3", "address", MAC_A)
            .with_attr("enx3", "operstate", "down");
        let links = FakeLinks::default();
        apply_renames(&reader, &links, &[req(MAC_A, "eth0")], true, true).unwrap();
        assert_eq!(*links.executed.borrow(), vec!["rename enx3 eth0"]);
    }
}
