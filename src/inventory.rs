// Socket inventory of the monitored process tree

use crate::backends::process::ProcessIntrospector;
use crate::generation::InodeSet;

/// Socket inodes owned by the root process and its children
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    pub inodes: InodeSet,
    /// Processes whose descriptors were read, root first
    pub members: Vec<i32>,
    /// Processes that belong to the tree but could not be read
    pub skipped: usize,
}

/// Collect the socket inodes of `root_pid` and its direct children
///
/// Children are found by one pass over the process list comparing each
/// parent pid with `root_pid`. Grandchildren are not followed within a
/// pass. Processes that exit or deny access mid-scan are skipped, so the
/// result may be partial; the next refresh scans again.
pub fn build_inventory(root_pid: i32, introspector: &dyn ProcessIntrospector) -> Inventory {
    let mut inventory = Inventory::default();
    collect(root_pid, introspector, &mut inventory);

    match introspector.processes() {
        Ok(statuses) => {
            for status in statuses {
                if status.ppid == root_pid && status.pid != root_pid {
                    collect(status.pid, introspector, &mut inventory);
                }
            }
        }
        Err(e) => {
            log::warn!(
                "Process enumeration failed, inventory limited to pid {}: {:#}",
                root_pid,
                e
            );
        }
    }

    inventory
}

fn collect(pid: i32, introspector: &dyn ProcessIntrospector, inventory: &mut Inventory) {
    match introspector.socket_inodes(pid) {
        Ok(inodes) => {
            log::trace!("Process {}: {} sockets", pid, inodes.len());
            inventory.inodes.extend(inodes);
            inventory.members.push(pid);
        }
        Err(e) => {
            log::debug!("Skipping process {}: {:#}", pid, e);
            inventory.skipped += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::process::fake::FakeIntrospector;

    #[test]
    fn test_root_and_children_are_collected() {
        let fake = FakeIntrospector::new();
        fake.add_process(1, 0, &[]);
        fake.add_process(100, 1, &[1000, 1001]);
        fake.add_process(200, 100, &[2000]);
        fake.add_process(201, 100, &[2010, 2011]);
        fake.add_process(300, 1, &[3000]);

        let inventory = build_inventory(100, &fake);
        assert_eq!(
            inventory.inodes,
            [1000, 1001, 2000, 2010, 2011].into_iter().collect()
        );
        assert_eq!(inventory.members, vec![100, 200, 201]);
        assert_eq!(inventory.skipped, 0);
    }

    #[test]
    fn test_grandchildren_are_not_followed() {
        let fake = FakeIntrospector::new();
        fake.add_process(100, 1, &[1]);
        fake.add_process(200, 100, &[2]);
        fake.add_process(300, 200, &[3]);

        let inventory = build_inventory(100, &fake);
        assert!(inventory.inodes.contains(&2));
        assert!(!inventory.inodes.contains(&3));
    }

    #[test]
    fn test_unreadable_processes_are_skipped() {
        let fake = FakeIntrospector::new();
        fake.add_process(100, 1, &[1]);
        fake.add_process(200, 100, &[2]);
        fake.add_process(201, 100, &[3]);
        fake.hide_fds(200);

        let inventory = build_inventory(100, &fake);
        assert_eq!(inventory.inodes, [1, 3].into_iter().collect());
        assert_eq!(inventory.skipped, 1);
    }

    #[test]
    fn test_missing_root_still_scans_children() {
        let fake = FakeIntrospector::new();
        fake.add_process(200, 100, &[2]);

        let inventory = build_inventory(100, &fake);
        assert_eq!(inventory.inodes, [2].into_iter().collect());
        assert_eq!(inventory.members, vec![200]);
        assert_eq!(inventory.skipped, 1);
    }

    #[test]
    fn test_process_list_failure_keeps_root() {
        let fake = FakeIntrospector::new();
        fake.add_process(100, 1, &[7, 8]);
        fake.add_process(200, 100, &[9]);
        fake.break_process_list();

        let inventory = build_inventory(100, &fake);
        assert_eq!(inventory.inodes, [7, 8].into_iter().collect());
        assert_eq!(inventory.members, vec![100]);
    }
}
